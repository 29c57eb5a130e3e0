use crate::dedup::errors::StoreError;
use crate::dedup::types::{DownloadId, DownloadRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Store key of the In-Flight Registry document.
pub const PENDING_DOWNLOADS: &str = "pendingDownloads";
/// Store key of the Duplicate Index document.
pub const DOWNLOAD_LINKS_TABLE: &str = "downloadLinksTable";

/// One persisted mapping document, read and written in full.
pub type Table = HashMap<DownloadId, DownloadRecord>;

/// Whole-document keyed store with sync-wins-on-conflict semantics supplied
/// by the backing implementation, not by this crate.
///
/// A read returns the latest table the store knows for a key; a write
/// replaces that table entirely. There is no compare-and-swap: overlapping
/// read-modify-write cycles against the same key are last-writer-wins.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn read_table(&self, key: &str) -> Result<Table>;
    async fn write_table(&self, key: &str, table: &Table) -> Result<()>;
}

/// File-backed store: one pretty-printed JSON document per key under the
/// data directory, written to a `.tmp` path and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn table_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl SyncStore for JsonFileStore {
    async fn read_table(&self, key: &str) -> Result<Table> {
        let path = self.table_path(key);
        if !path.exists() {
            return Ok(Table::new());
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::ReadTable {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::ParseTable { path, source })
    }

    async fn write_table(&self, key: &str, table: &Table) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::EnsureDir {
                path: self.dir.clone(),
                source,
            })?;
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|source| StoreError::SerializeTable { source })?;
        let path = self.table_path(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| StoreError::WriteTable {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Rename {
                from: tmp,
                to: path,
                source,
            })?;
        Ok(())
    }
}

/// In-process store with the same whole-document contract. Used for tests
/// and for running without a data directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Table>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn read_table(&self, key: &str) -> Result<Table> {
        Ok(self.lock().get(key).cloned().unwrap_or_default())
    }

    async fn write_table(&self, key: &str, table: &Table) -> Result<()> {
        self.lock().insert(key.to_string(), table.clone());
        Ok(())
    }
}

/// One of the two persisted mappings (In-Flight Registry or Duplicate
/// Index) behind `get`/`put`/`delete`/`scan`.
///
/// Every operation round-trips the whole backing document; mutations read,
/// modify in memory and write the document back. The scan-by-value lookups
/// in the duplicate predicates are acceptable only at small table sizes.
#[derive(Clone)]
pub struct MappingTable {
    store: Arc<dyn SyncStore>,
    key: &'static str,
}

impl MappingTable {
    pub fn new(store: Arc<dyn SyncStore>, key: &'static str) -> Self {
        Self { store, key }
    }

    pub async fn get(&self, id: DownloadId) -> Result<Option<DownloadRecord>> {
        let table = self.store.read_table(self.key).await?;
        Ok(table.get(&id).cloned())
    }

    pub async fn put(&self, id: DownloadId, record: DownloadRecord) -> Result<()> {
        let mut table = self.store.read_table(self.key).await?;
        table.insert(id, record);
        self.store.write_table(self.key, &table).await
    }

    pub async fn delete(&self, id: DownloadId) -> Result<()> {
        let mut table = self.store.read_table(self.key).await?;
        if table.remove(&id).is_none() {
            return Ok(());
        }
        self.store.write_table(self.key, &table).await
    }

    pub async fn scan(&self) -> Result<Vec<(DownloadId, DownloadRecord)>> {
        let table = self.store.read_table(self.key).await?;
        Ok(table.into_iter().collect())
    }
}
