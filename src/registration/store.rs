//! Credential store
//!
//! Issued credentials keyed by user id, persisted as one pretty-printed JSON
//! object. Writes go to `<file>.tmp` first and are renamed over the real file,
//! so a reader never observes a partial document. Reads are served from the
//! in-memory copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::types::{GatekeeperError, Result};

/// Credentials issued to one user; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    /// Filled from the map key when loading older files
    #[serde(default)]
    pub user_id: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// Logical contract of the credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Record for a user, if registered
    fn get(&self, user_id: &str) -> Option<RegistrationRecord>;

    /// Whether any record already uses this username
    fn is_username_taken(&self, username: &str) -> bool;

    /// Persist a new record. Existing records are never overwritten.
    async fn insert(&self, record: RegistrationRecord) -> Result<()>;

    fn is_registered(&self, user_id: &str) -> bool {
        self.get(user_id).is_some()
    }
}

/// JSON file backed store (or memory-only when no path is given)
pub struct RegistrationStore {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, RegistrationRecord>>,
    /// Serializes file rewrites
    flush_lock: Mutex<()>,
}

impl RegistrationStore {
    /// Open the store at `path`, creating the directory and an empty file if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_records(&content).map_err(|e| {
                error!("Failed to read registration data {}: {}", path.display(), e);
                e
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_atomic(&path, &HashMap::new()).await?;
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!("Loaded {} registrations from {}", records.len(), path.display());

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
            flush_lock: Mutex::new(()),
        })
    }

    /// Store without persistence, for dev mode and tests
    pub fn memory_only() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RegistrationRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CredentialStore for RegistrationStore {
    fn get(&self, user_id: &str) -> Option<RegistrationRecord> {
        self.read().get(user_id).cloned()
    }

    fn is_username_taken(&self, username: &str) -> bool {
        self.read().values().any(|rec| rec.username == username)
    }

    async fn insert(&self, record: RegistrationRecord) -> Result<()> {
        let _flush = self.flush_lock.lock().await;

        let snapshot = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if records.contains_key(&record.user_id) {
                return Err(GatekeeperError::Storage(format!(
                    "user {} is already registered",
                    record.user_id
                )));
            }
            records.insert(record.user_id.clone(), record);
            records.clone()
        };

        match &self.path {
            Some(path) => write_atomic(path, &snapshot).await,
            None => Ok(()),
        }
    }
}

fn parse_records(content: &str) -> Result<HashMap<String, RegistrationRecord>> {
    let content = if content.trim().is_empty() { "{}" } else { content };
    let mut records: HashMap<String, RegistrationRecord> = serde_json::from_str(content)
        .map_err(|e| GatekeeperError::Storage(format!("corrupt registration file: {}", e)))?;
    for (user_id, record) in records.iter_mut() {
        if record.user_id.is_empty() {
            record.user_id = user_id.clone();
        }
    }
    Ok(records)
}

async fn write_atomic(path: &Path, records: &HashMap<String, RegistrationRecord>) -> Result<()> {
    let body = serde_json::to_string_pretty(records)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
