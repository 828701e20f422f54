//! hopnotes - a local semantic index over personal notes with multi-hop
//! question answering.
//!
//! Notes are normalized, split into overlapping chunks with content-addressed
//! ids, embedded, and stored in a single [redb](https://github.com/cberner/redb)
//! file. Questions are answered in two retrieval passes: the first searches
//! with the question alone, the second adds concept phrases extracted from
//! the first pass's hits, and the merged result is handed to an answer
//! generator.
//!
//! Embedding, concept extraction and answer generation sit behind the traits
//! in [`provider`]. Offline implementations ship with the crate:
//! [`LocalEmbedder`] (mean-pooled ColBERT), [`TermFrequencyExtractor`] and
//! [`ExtractiveAnswerer`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use hopnotes::{
//!     DataDir, ExtractiveAnswerer, HopnotesConfig, Indexer, LocalEmbedder,
//!     NoteInput, NoteStore, Orchestrator, TermFrequencyExtractor,
//! };
//!
//! # async fn run() -> hopnotes::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let store = NoteStore::open(&data_dir.notes_db())?;
//! let config = HopnotesConfig::default();
//! let embedder = LocalEmbedder::new(hopnotes::model_manager::DEFAULT_MODEL_ID.into());
//!
//! let indexer = Indexer::new(&store, &embedder, config.indexing, config.provider_timeout);
//! indexer
//!     .upsert_document(&NoteInput {
//!         note_id: "journal:cells.md".into(),
//!         title: "Cells".into(),
//!         body: "Mitochondria produce most of a cell's energy.".into(),
//!         updated_at: 0,
//!     })
//!     .await?;
//!
//! let extractor = TermFrequencyExtractor::default();
//! let answerer = ExtractiveAnswerer::default();
//! let orchestrator = Orchestrator::new(
//!     &store,
//!     &embedder,
//!     &extractor,
//!     &answerer,
//!     config.retrieval,
//!     Duration::from_secs(60),
//! );
//! let answer = orchestrator.ask("how do cells get energy?", &[]).await?;
//! println!("{}", answer.answer);
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod concepts;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod error;
pub mod extractive;
pub mod ids;
pub mod incremental;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod multi_hop;
pub mod provider;
pub mod search;
pub mod store;
pub mod text_util;
pub mod walker;

#[cfg(test)]
mod testing;

pub use concepts::TermFrequencyExtractor;
pub use config::HopnotesConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use extractive::ExtractiveAnswerer;
pub use incremental::{Indexer, NoteInput, UpsertOutcome};
pub use model_manager::LocalEmbedder;
pub use multi_hop::{Answer, Orchestrator};
pub use store::NoteStore;
