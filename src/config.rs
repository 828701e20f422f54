//! Retrieval and indexing tunables.
//!
//! Defaults live here; `hopnotes settings set <key> <value>` persists
//! overrides in `config.redb`, and [`HopnotesConfig::load`] overlays them.

use std::time::Duration;

use serde::Serialize;

use crate::{
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    error::{Error, Result},
    search::SearchParams,
};

/// Settings key for the local embedding model.
pub const MODEL_SETTING: &str = "model";

/// Keys whose new value only reaches notes that are indexed again.
///
/// Unchanged notes are skipped by body hash, so existing chunks and vectors
/// keep the old model or chunking until `hopnotes rebuild`.
pub const REBUILD_KEYS: &[&str] = &[MODEL_SETTING, "chunk_size", "chunk_overlap"];

pub fn needs_rebuild(key: &str) -> bool {
    REBUILD_KEYS.contains(&key)
}

/// Every recognized settings key with a one-line description.
pub const SETTING_KEYS: &[(&str, &str)] = &[
    (
        MODEL_SETTING,
        "embedding model id or local path (run `hopnotes rebuild` after changing)",
    ),
    ("single_hop_k", "results returned by single-pass search"),
    ("single_hop_min_score", "score threshold for single-pass search"),
    ("single_hop_max_per_document", "per-note cap for single-pass search"),
    ("pass1_k", "results returned by the first multi-hop pass"),
    ("pass1_min_score", "score threshold for the first pass"),
    ("pass1_max_per_document", "per-note cap for the first pass"),
    ("pass2_k", "results returned by the expanded pass"),
    ("pass2_min_score", "score threshold for the expanded pass"),
    ("pass2_max_per_document", "per-note cap for the expanded pass"),
    ("final_top_n", "chunks handed to the answer generator"),
    ("max_concepts", "concept phrases kept from extraction"),
    ("embed_batch_size", "chunks per embedding call"),
    (
        "chunk_size",
        "maximum characters per chunk (run `hopnotes rebuild` after changing)",
    ),
    (
        "chunk_overlap",
        "characters shared by neighboring chunks (run `hopnotes rebuild` after changing)",
    ),
    ("provider_timeout_secs", "seconds before a provider call is abandoned"),
];

/// Parameters for the retrieval passes of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalConfig {
    pub single_hop: SearchParams,
    pub pass1: SearchParams,
    /// More permissive than `pass1`: lower threshold, more results.
    pub pass2: SearchParams,
    pub final_top_n: usize,
    pub max_concepts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            single_hop: SearchParams {
                k: 8,
                min_score: 0.25,
                max_per_document: 3,
            },
            pass1: SearchParams {
                k: 8,
                min_score: 0.25,
                max_per_document: 2,
            },
            pass2: SearchParams {
                k: 12,
                min_score: 0.15,
                max_per_document: 3,
            },
            final_top_n: 16,
            max_concepts: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexingConfig {
    pub chunking: ChunkingConfig,
    pub embed_batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embed_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopnotesConfig {
    pub retrieval: RetrievalConfig,
    pub indexing: IndexingConfig,
    #[serde(serialize_with = "serialize_secs")]
    pub provider_timeout: Duration,
}

impl Default for HopnotesConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            indexing: IndexingConfig::default(),
            provider_timeout: Duration::from_secs(60),
        }
    }
}

impl HopnotesConfig {
    /// Defaults overlaid with every setting stored in `config_db`.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in config_db.list_settings()? {
            config.apply(&key, &value)?;
        }
        Ok(config)
    }

    /// Override one tunable from its string form.
    ///
    /// The model key is accepted and ignored; it is resolved separately.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let r = &mut self.retrieval;
        match key {
            MODEL_SETTING => {}
            "single_hop_k" => r.single_hop.k = positive(key, value)?,
            "single_hop_min_score" => r.single_hop.min_score = score(key, value)?,
            "single_hop_max_per_document" => {
                r.single_hop.max_per_document = positive(key, value)?
            }
            "pass1_k" => r.pass1.k = positive(key, value)?,
            "pass1_min_score" => r.pass1.min_score = score(key, value)?,
            "pass1_max_per_document" => {
                r.pass1.max_per_document = positive(key, value)?
            }
            "pass2_k" => r.pass2.k = positive(key, value)?,
            "pass2_min_score" => r.pass2.min_score = score(key, value)?,
            "pass2_max_per_document" => {
                r.pass2.max_per_document = positive(key, value)?
            }
            "final_top_n" => r.final_top_n = positive(key, value)?,
            "max_concepts" => r.max_concepts = parse(key, value)?,
            "embed_batch_size" => {
                self.indexing.embed_batch_size = positive(key, value)?
            }
            "chunk_size" => {
                self.indexing.chunking.chunk_size = positive(key, value)?
            }
            "chunk_overlap" => {
                self.indexing.chunking.overlap = parse(key, value)?
            }
            "provider_timeout_secs" => {
                self.provider_timeout =
                    Duration::from_secs(positive::<u64>(key, value)?)
            }
            _ => {
                return Err(Error::Config(format!("unknown setting: {key}")));
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid value for {key}: {value:?}"))
    })
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed: T = parse(key, value)?;
    if parsed <= T::default() {
        return Err(Error::Config(format!("{key} must be positive")));
    }
    Ok(parsed)
}

fn score(key: &str, value: &str) -> Result<f32> {
    let parsed: f32 = parse(key, value)?;
    if !parsed.is_finite() {
        return Err(Error::Config(format!("{key} must be finite")));
    }
    Ok(parsed)
}

fn serialize_secs<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_pass_is_more_permissive() {
        let r = RetrievalConfig::default();
        assert!(r.pass2.min_score < r.pass1.min_score);
        assert!(r.final_top_n > r.pass1.k.max(r.pass2.k));
    }

    #[test]
    fn load_overlays_stored_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        db.set_setting("pass2_min_score", "0.05").unwrap();
        db.set_setting("embed_batch_size", "16").unwrap();
        db.set_setting(MODEL_SETTING, "some/model").unwrap();

        let config = HopnotesConfig::load(&db).unwrap();
        assert_eq!(config.retrieval.pass2.min_score, 0.05);
        assert_eq!(config.indexing.embed_batch_size, 16);
        assert_eq!(config.retrieval.pass1, RetrievalConfig::default().pass1);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = HopnotesConfig::default();
        assert!(matches!(
            config.apply("pass1_k", "many"),
            Err(Error::Config(_))
        ));
        assert!(matches!(config.apply("chunk_size", "0"), Err(Error::Config(_))));
        assert!(matches!(
            config.apply("pass1_min_score", "NaN"),
            Err(Error::Config(_))
        ));
        assert!(matches!(config.apply("bogus", "1"), Err(Error::Config(_))));
    }

    #[test]
    fn every_listed_key_is_applicable() {
        for (key, _) in SETTING_KEYS {
            let mut config = HopnotesConfig::default();
            config.apply(key, "1").unwrap();
        }
    }

    #[test]
    fn timeout_in_seconds() {
        let mut config = HopnotesConfig::default();
        config.apply("provider_timeout_secs", "5").unwrap();
        assert_eq!(config.provider_timeout, Duration::from_secs(5));
    }

    #[test]
    fn index_shaping_keys_ask_for_rebuild() {
        assert!(needs_rebuild("chunk_size"));
        assert!(needs_rebuild("chunk_overlap"));
        assert!(needs_rebuild(MODEL_SETTING));
        assert!(!needs_rebuild("final_top_n"));

        for key in REBUILD_KEYS {
            let (_, description) = SETTING_KEYS
                .iter()
                .find(|(k, _)| k == key)
                .unwrap();
            assert!(description.contains("rebuild"));
        }
    }
}
