use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "HOPNOTES_DATA_DIR";

const CONFIG_DB: &str = "config.redb";
const NOTES_DB: &str = "notes.redb";

/// Where hopnotes keeps its two databases.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the data directory and create it if needed.
    ///
    /// `--data-dir` wins, then a non-empty `HOPNOTES_DATA_DIR`, then
    /// `$XDG_DATA_HOME/hopnotes`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(val) if !val.is_empty() => PathBuf::from(val),
                _ => xdg_root()?,
            },
        };

        if !root.is_dir() {
            std::fs::create_dir_all(&root)
                .map_err(|_| Error::DataDir(root.clone()))?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collections and settings.
    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB)
    }

    /// Documents, chunks and vectors.
    pub fn notes_db(&self) -> PathBuf {
        self.root.join(NOTES_DB)
    }
}

fn xdg_root() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("hopnotes")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_holds_both_databases() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_db(), tmp.path().join("config.redb"));
        assert_eq!(dir.notes_db(), tmp.path().join("notes.redb"));
    }

    #[test]
    fn missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
    }

    #[test]
    fn file_in_the_way_is_a_data_dir_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("taken");
        std::fs::write(&file, "x").unwrap();

        let err = DataDir::resolve(Some(&file.join("sub"))).unwrap_err();
        assert!(matches!(err, Error::DataDir(_)));
    }
}
