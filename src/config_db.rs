use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const COLLECTIONS: TableDefinition<&str, &str> =
    TableDefinition::new("collections");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

type StrTable = TableDefinition<'static, &'static str, &'static str>;

/// Collections (named note directories) and persisted settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Collections --

    pub fn set_collection(&self, name: &str, path: &str) -> Result<()> {
        self.insert(COLLECTIONS, name, path)
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<String>> {
        self.get(COLLECTIONS, name)
    }

    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        self.remove(COLLECTIONS, name)
    }

    pub fn list_collections(&self) -> Result<Vec<(String, String)>> {
        self.list(COLLECTIONS)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.insert(SETTINGS, key, value)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.get(SETTINGS, key)
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        self.remove(SETTINGS, key)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        self.list(SETTINGS)
    }

    fn insert(
        &self,
        def: StrTable,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(
        &self,
        def: StrTable,
        key: &str,
    ) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn remove(&self, def: StrTable, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(def)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn list(
        &self,
        def: StrTable,
    ) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
