//! File-backed user data store
//!
//! Keeps the `.infraproc/nodes.json` document, which records every node the
//! processor has started.

use crate::collaborator::UserDataStore;
use crate::error::{BackendError, Result};
use crate::model::{InfraId, InstanceData};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STORE_VERSION: u32 = 1;
const STORE_DIR: &str = ".infraproc";
const STORE_FILE: &str = "nodes.json";
const STORE_BACKUP: &str = "nodes.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Persisted document listing started nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Document format version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Started nodes indexed by `infra_id/node_name`
    pub nodes: BTreeMap<String, StartedNode>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            nodes: BTreeMap::new(),
        }
    }
}

impl StoreDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(infra_id: &InfraId, node_name: &str) -> String {
        format!("{}/{}", infra_id, node_name)
    }

    /// Add or replace the record for a node
    pub fn insert(&mut self, node: StartedNode) {
        self.nodes
            .insert(Self::key(&node.infra_id, &node.node_name), node);
        self.updated_at = Utc::now();
    }

    pub fn get(&self, infra_id: &InfraId, node_name: &str) -> Option<&StartedNode> {
        self.nodes.get(&Self::key(infra_id, node_name))
    }

    /// Nodes started in one infrastructure
    pub fn nodes_of<'a>(&'a self, infra_id: &'a InfraId) -> impl Iterator<Item = &'a StartedNode> {
        self.nodes.values().filter(move |n| &n.infra_id == infra_id)
    }
}

/// A started node as recorded by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedNode {
    pub infra_id: InfraId,

    pub node_name: String,

    pub registered_at: DateTime<Utc>,

    pub instance_data: InstanceData,
}

/// User data store persisting to a JSON document under a project root
pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles between tasks of this process;
    // the lock file covers other processes.
    write_guard: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_guard: Mutex::new(()),
        }
    }

    fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    fn store_path(&self) -> PathBuf {
        self.store_dir().join(STORE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.store_dir().join(STORE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.store_dir().join(LOCK_FILE)
    }

    async fn ensure_store_dir(&self) -> Result<()> {
        let dir = self.store_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created store directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current document; a missing file is an empty document
    pub async fn load(&self) -> Result<StoreDocument> {
        let path = self.store_path();
        if !path.exists() {
            tracing::debug!("Store file not found, returning empty document");
            return Ok(StoreDocument::new());
        }

        let content = fs::read_to_string(&path).await?;
        let document: StoreDocument = serde_json::from_str(&content)?;

        if document.version > STORE_VERSION {
            return Err(BackendError::StateError(format!(
                "Store file version {} is newer than supported version {}",
                document.version, STORE_VERSION
            )));
        }

        tracing::debug!("Loaded store with {} nodes", document.nodes.len());
        Ok(document)
    }

    /// Write the document, keeping the previous one as a backup
    pub async fn save(&self, document: &StoreDocument) -> Result<()> {
        self.ensure_store_dir().await?;

        let path = self.store_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(document)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved store with {} nodes", document.nodes.len());
        Ok(())
    }

    /// Acquire the cross-process lock; locks older than an hour are stale
    pub async fn acquire_lock(&self) -> Result<StoreLock> {
        self.ensure_store_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(BackendError::LockError(format!(
                    "Store is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
            fs::remove_file(&lock_path).await?;
        }

        let lock_info = LockInfo {
            holder: format!(
                "{}:{}",
                std::env::var("HOSTNAME")
                    .or_else(|_| std::env::var("HOST"))
                    .unwrap_or_else(|_| "unknown".to_string()),
                std::process::id()
            ),
            acquired_at: Utc::now(),
        };

        // create_new: two processes racing past the check above must not both win
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    BackendError::LockError("Store lock was taken concurrently".to_string())
                }
                _ => BackendError::Io(e),
            })?;
        file.write_all(serde_json::to_string_pretty(&lock_info)?.as_bytes())
            .await?;
        file.flush().await?;

        tracing::debug!("Acquired store lock");
        Ok(StoreLock {
            lock_path,
            released: false,
        })
    }
}

#[async_trait]
impl UserDataStore for FileStore {
    async fn register_started_node(
        &self,
        infra_id: &InfraId,
        node_name: &str,
        instance_data: &InstanceData,
    ) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let lock = self.acquire_lock().await?;

        let mut document = self.load().await?;
        document.insert(StartedNode {
            infra_id: infra_id.clone(),
            node_name: node_name.to_string(),
            registered_at: Utc::now(),
            instance_data: instance_data.clone(),
        });
        let saved = self.save(&document).await;

        lock.release().await?;
        saved
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the store lock
pub struct StoreLock {
    lock_path: PathBuf,
    released: bool,
}

impl StoreLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released store lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
