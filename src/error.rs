use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("stored record is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{provider} provider failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} provider timed out after {after:?}")]
    ProviderTimeout {
        provider: &'static str,
        after: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error. Retrying with the same input fails the same way.
    InvalidInput,
    /// An embedding, concept or answer provider failed or timed out.
    ProviderFailure,
    /// The store could not read or commit.
    StorageFailure,
    Other,
}

impl Error {
    pub fn provider(provider: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Provider {
            provider,
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Provider { .. } | Self::ProviderTimeout { .. } => {
                ErrorKind::ProviderFailure
            }
            Self::Redb(_)
            | Self::RedbDatabase(_)
            | Self::RedbStorage(_)
            | Self::RedbTransaction(_)
            | Self::RedbTable(_)
            | Self::RedbCommit(_)
            | Self::Serialization(_) => ErrorKind::StorageFailure,
            Self::Io(_)
            | Self::Config(_)
            | Self::NotFound { .. }
            | Self::DataDir(_) => ErrorKind::Other,
        }
    }
}
