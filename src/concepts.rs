use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::{error::Result, provider::ConceptExtractor, text_util::content_terms};

/// Offline [`ConceptExtractor`]: the most frequent terms of the pass-one
/// summary that the question does not already contain.
#[derive(Debug, Clone)]
pub struct TermFrequencyExtractor {
    limit: usize,
}

impl TermFrequencyExtractor {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for TermFrequencyExtractor {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl ConceptExtractor for TermFrequencyExtractor {
    async fn extract_concepts(
        &self,
        question: &str,
        summary: &str,
    ) -> Result<Vec<String>> {
        let asked: HashSet<String> = content_terms(question).into_iter().collect();

        // term -> (count, first position)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (pos, term) in content_terms(summary).into_iter().enumerate() {
            if asked.contains(&term) || term.chars().all(|c| c.is_numeric()) {
                continue;
            }
            counts.entry(term).or_insert((0, pos)).0 += 1;
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));

        Ok(ranked
            .into_iter()
            .take(self.limit)
            .map(|(term, _)| term)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frequent_new_terms_come_first() {
        let summary = "- Respiration: Cellular respiration releases energy as ATP.\n\
                       - Mitochondria: Mitochondria make ATP for the cell. 42 ATP.";
        let concepts = TermFrequencyExtractor::new(3)
            .extract_concepts("how do cells get energy", summary)
            .await
            .unwrap();

        assert_eq!(concepts, vec!["atp", "respiration", "mitochondria"]);
    }

    #[tokio::test]
    async fn empty_summary_yields_nothing() {
        let concepts = TermFrequencyExtractor::default()
            .extract_concepts("anything", "")
            .await
            .unwrap();
        assert!(concepts.is_empty());
    }
}
