use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    error::Result,
    provider::{
        AnswerGenerator,
        Citation,
        ContextChunk,
        GeneratedAnswer,
        Role,
        Turn,
    },
    text_util::{content_terms, sentences},
};

pub const NOTHING_FOUND: &str = "I couldn't find anything in your notes about that.";

/// Offline [`AnswerGenerator`] that answers with the context sentences
/// sharing the most terms with the question, each one cited.
#[derive(Debug, Clone)]
pub struct ExtractiveAnswerer {
    max_sentences: usize,
}

impl ExtractiveAnswerer {
    pub fn new(max_sentences: usize) -> Self {
        Self { max_sentences }
    }
}

impl Default for ExtractiveAnswerer {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveAnswerer {
    async fn answer(
        &self,
        question: &str,
        context: &[ContextChunk],
        history: &[Turn],
    ) -> Result<GeneratedAnswer> {
        let mut wanted: HashSet<String> =
            content_terms(question).into_iter().collect();
        // Follow-ups like "why?" borrow the previous question's terms.
        if wanted.is_empty()
            && let Some(turn) = history.iter().rev().find(|t| t.role == Role::User)
        {
            wanted = content_terms(&turn.content).into_iter().collect();
        }

        // (overlap, context position, sentence position)
        let mut candidates = Vec::new();
        for (ci, chunk) in context.iter().enumerate() {
            for (si, sentence) in sentences(&chunk.text).into_iter().enumerate() {
                let found: HashSet<String> =
                    content_terms(sentence).into_iter().collect();
                let overlap = found.intersection(&wanted).count();
                if overlap > 0 {
                    candidates.push((overlap, ci, si, sentence));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2))
        });

        let mut seen = HashSet::new();
        let citations: Vec<Citation> = candidates
            .into_iter()
            .filter(|(_, _, _, sentence)| seen.insert(*sentence))
            .take(self.max_sentences)
            .map(|(_, ci, _, sentence)| Citation {
                chunk_id: context[ci].chunk_id.clone(),
                note_id: context[ci].note_id.clone(),
                quote: sentence.to_string(),
            })
            .collect();

        if citations.is_empty() {
            return Ok(GeneratedAnswer {
                answer: NOTHING_FOUND.to_string(),
                citations,
            });
        }

        let answer = citations
            .iter()
            .map(|c| c.quote.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(GeneratedAnswer { answer, citations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str, text: &str) -> ContextChunk {
        ContextChunk {
            chunk_id: format!("{id}#0"),
            note_id: id.to_string(),
            note_title: id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn quotes_best_matching_sentences() {
        let context = vec![
            ctx("a", "Plants are green. Leaves catch light."),
            ctx("b", "Cells get energy from glucose. Cells divide."),
        ];
        let answer = ExtractiveAnswerer::new(1)
            .answer("how do cells get energy", &context, &[])
            .await
            .unwrap();

        assert_eq!(answer.answer, "Cells get energy from glucose.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "b#0");
    }

    #[tokio::test]
    async fn empty_context_says_nothing_found() {
        let answer = ExtractiveAnswerer::default()
            .answer("anything at all", &[], &[])
            .await
            .unwrap();
        assert_eq!(answer.answer, NOTHING_FOUND);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn follow_up_uses_history() {
        let context = vec![ctx("a", "Mitochondria produce energy.")];
        let history = vec![Turn {
            role: Role::User,
            content: "what produces energy".to_string(),
        }];
        let answer = ExtractiveAnswerer::default()
            .answer("why?", &context, &history)
            .await
            .unwrap();
        assert_eq!(answer.citations.len(), 1);
    }
}
