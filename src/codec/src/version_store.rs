use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use model::{current_timestamp_ms, Schema};

use crate::error::VersionStoreError;

/// Persistence for per-origin schema versions.
///
/// Versions are append-only: `load_schema` returns the most recently saved
/// schema for the origin.
pub trait VersionStore: Send + Sync {
    fn load_schema(&self, origin: &str) -> impl Future<Output = Result<Option<Schema>, VersionStoreError>> + Send;

    fn save_schema(
        &self,
        origin: &str,
        version: &str,
        schema: &Schema,
    ) -> impl Future<Output = Result<(), VersionStoreError>> + Send;
}

impl<T: VersionStore> VersionStore for Arc<T> {
    fn load_schema(&self, origin: &str) -> impl Future<Output = Result<Option<Schema>, VersionStoreError>> + Send {
        (**self).load_schema(origin)
    }

    fn save_schema(
        &self,
        origin: &str,
        version: &str,
        schema: &Schema,
    ) -> impl Future<Output = Result<(), VersionStoreError>> + Send {
        (**self).save_schema(origin, version, schema)
    }
}

/// In-memory version store, mostly for tests and single-process setups
#[derive(Default)]
pub struct MemoryVersionStore {
    history: RwLock<HashMap<String, Vec<Schema>>>,
    saves: AtomicUsize,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves across all origins
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Every schema saved for `origin`, oldest first
    pub async fn history(&self, origin: &str) -> Vec<Schema> {
        self.history.read().await.get(origin).cloned().unwrap_or_default()
    }
}

impl VersionStore for MemoryVersionStore {
    async fn load_schema(&self, origin: &str) -> Result<Option<Schema>, VersionStoreError> {
        Ok(self
            .history
            .read()
            .await
            .get(origin)
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn save_schema(&self, origin: &str, version: &str, schema: &Schema) -> Result<(), VersionStoreError> {
        let mut saved = schema.clone();
        saved.version = Some(version.to_string());
        self.history.write().await.entry(origin.to_string()).or_default().push(saved);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedSchema {
    origin: String,
    version: String,
    saved_at: u64,
    schema: Schema,
}

/// File-backed version store.
///
/// Layout: `<root>/<origin>/<sequence>-<version>.json`, one file per save.
/// The sequence is zero-padded so the latest save sorts last.
pub struct FileVersionStore {
    root: PathBuf,
}

impl FileVersionStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        info!("FileVersionStore at {:?}", root);
        FileVersionStore { root }
    }

    fn origin_dir(&self, origin: &str) -> PathBuf {
        self.root.join(encode_component(origin))
    }

    /// Saved file names for an origin, sorted oldest first
    async fn saved_files(&self, origin: &str) -> Result<Vec<PathBuf>, VersionStoreError> {
        let dir = self.origin_dir(origin);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl VersionStore for FileVersionStore {
    async fn load_schema(&self, origin: &str) -> Result<Option<Schema>, VersionStoreError> {
        let files = self.saved_files(origin).await?;
        let Some(latest) = files.last() else {
            return Ok(None);
        };

        let data = tokio::fs::read(latest).await?;
        let saved: SavedSchema = serde_json::from_slice(&data)?;
        debug!("Loaded schema version {} for {} from {:?}", saved.version, origin, latest);
        Ok(Some(saved.schema))
    }

    async fn save_schema(&self, origin: &str, version: &str, schema: &Schema) -> Result<(), VersionStoreError> {
        let dir = self.origin_dir(origin);
        tokio::fs::create_dir_all(&dir).await?;

        let sequence = self.saved_files(origin).await?.len() + 1;
        let path = dir.join(format!("{:08}-{}.json", sequence, encode_component(version)));

        let mut schema = schema.clone();
        schema.version = Some(version.to_string());
        let saved = SavedSchema {
            origin: origin.to_string(),
            version: version.to_string(),
            saved_at: current_timestamp_ms(),
            schema,
        };
        let data = serde_json::to_vec_pretty(&saved)?;

        // Write then rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved schema version {} for {} to {:?}", version, origin, path);
        Ok(())
    }
}

/// Percent-encode a name for use as a path component. Only ASCII
/// alphanumerics, '-' and '_' pass through, so the mapping is injective.
fn encode_component(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
