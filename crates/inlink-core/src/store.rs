//! Shared key-value store visible to every extension context.
//!
//! `SharedStore` is the capability each context holds instead of a global.
//! Mutations publish a `StorageChange` describing old and new values, which is
//! what the background coordinator relays to tabs. `MemoryStore` is the
//! in-process implementation, optionally persisted to a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{
    keys, ExtractionFailure, ExtractionRecord, ExtractionStatus, ProfileData, SessionCredential,
};

/// Old and new value of a single key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    #[serde(rename = "oldValue", skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(rename = "newValue", skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// One store mutation, keyed by the keys whose value actually changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageChange {
    pub changes: BTreeMap<String, ValueChange>,
}

impl StorageChange {
    pub fn get(&self, key: &str) -> Option<&ValueChange> {
        self.changes.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read the given keys. Missing keys are absent from the result.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;

    /// Write every entry of `items`.
    async fn set(&self, items: Map<String, Value>) -> Result<()>;

    async fn remove(&self, keys: &[&str]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Subscribe to change notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

const CHANGE_CAPACITY: usize = 64;

/// In-process store with change broadcast and optional JSON persistence.
pub struct MemoryStore {
    data: RwLock<Map<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            data: RwLock::new(Map::new()),
            changes,
            path: None,
        }
    }

    /// Open a store persisted at `path`, loading existing contents if present.
    pub fn open(path: &Path) -> Self {
        let data: Map<String, Value> = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable store file {}: {}", path.display(), e);
                Map::new()
            }),
            Err(_) => Map::new(),
        };
        debug!("Store opened with {} keys", data.len());

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            data: RwLock::new(data),
            changes,
            path: Some(path.to_path_buf()),
        }
    }

    /// Snapshot of every key.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>) -> StorageChange,
    {
        let change = {
            let mut data = self.data.write();
            let mut next = data.clone();
            let change = apply(&mut next);
            if !change.is_empty() {
                // A failed write leaves the live map untouched.
                self.persist(&next)?;
                *data = next;
            }
            change
        };

        if !change.is_empty() {
            // No receivers is the steady state when no context listens.
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(path, json).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let data = self.data.read();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: Map<String, Value>) -> Result<()> {
        self.mutate(|data| {
            let mut change = StorageChange::default();
            for (key, value) in items {
                let old = data.insert(key.clone(), value.clone());
                if old.as_ref() != Some(&value) {
                    change.changes.insert(
                        key,
                        ValueChange {
                            old_value: old,
                            new_value: Some(value),
                        },
                    );
                }
            }
            change
        })
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.mutate(|data| {
            let mut change = StorageChange::default();
            for key in keys {
                if let Some(old) = data.remove(*key) {
                    change.changes.insert(
                        key.to_string(),
                        ValueChange {
                            old_value: Some(old),
                            new_value: None,
                        },
                    );
                }
            }
            change
        })
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(|data| StorageChange {
            changes: std::mem::take(data)
                .into_iter()
                .map(|(key, old)| {
                    (
                        key,
                        ValueChange {
                            old_value: Some(old),
                            new_value: None,
                        },
                    )
                })
                .collect(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// ---------------------------------------------------------------
// Typed accessors
// ---------------------------------------------------------------

/// Read the session credential. A missing or empty token means "not signed in".
pub async fn load_credential(store: &dyn SharedStore) -> Result<Option<SessionCredential>> {
    let stored = store.get(&[keys::AUTH_TOKEN, keys::USER_EMAIL]).await?;
    let token = stored
        .get(keys::AUTH_TOKEN)
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty());
    Ok(token.map(|token| SessionCredential {
        token: token.to_string(),
        email: stored
            .get(keys::USER_EMAIL)
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }))
}

pub async fn save_credential(store: &dyn SharedStore, credential: &SessionCredential) -> Result<()> {
    let mut items = Map::new();
    items.insert(keys::AUTH_TOKEN.into(), Value::String(credential.token.clone()));
    if let Some(email) = &credential.email {
        items.insert(keys::USER_EMAIL.into(), Value::String(email.clone()));
    }
    store.set(items).await
}

/// Read the extraction record. Malformed fields are treated as absent.
pub async fn load_extraction(store: &dyn SharedStore) -> Result<ExtractionRecord> {
    let stored = store.get(keys::EXTRACTION_FIELDS).await?;
    let field = |key: &str| stored.get(key).cloned();

    Ok(ExtractionRecord {
        status: field(keys::EXTRACTION_STATUS)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        data: field(keys::EXTRACTED_DATA).and_then(|v| serde_json::from_value(v).ok()),
        error: field(keys::EXTRACTION_ERROR).and_then(|v| serde_json::from_value(v).ok()),
        last_extraction: field(keys::LAST_EXTRACTION).and_then(|v| v.as_i64()),
    })
}

pub async fn record_extraction_started(store: &dyn SharedStore, now_ms: i64) -> Result<()> {
    store
        .set(status_items(ExtractionStatus::InProgress, now_ms)?)
        .await
}

pub async fn record_extraction_completed(
    store: &dyn SharedStore,
    data: &ProfileData,
    now_ms: i64,
) -> Result<()> {
    let mut items = status_items(ExtractionStatus::Completed, now_ms)?;
    items.insert(keys::EXTRACTED_DATA.into(), serde_json::to_value(data)?);
    store.set(items).await
}

pub async fn record_extraction_failed(
    store: &dyn SharedStore,
    failure: &ExtractionFailure,
    now_ms: i64,
) -> Result<()> {
    let mut items = status_items(ExtractionStatus::Failed, now_ms)?;
    items.insert(keys::EXTRACTION_ERROR.into(), serde_json::to_value(failure)?);
    store.set(items).await
}

fn status_items(status: ExtractionStatus, now_ms: i64) -> Result<Map<String, Value>> {
    let mut items = Map::new();
    items.insert(keys::EXTRACTION_STATUS.into(), serde_json::to_value(status)?);
    items.insert(keys::LAST_EXTRACTION.into(), Value::from(now_ms));
    Ok(items)
}
