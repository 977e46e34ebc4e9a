//! "Stream currently active" records, kept so a live session can be
//! resumed after a restart.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::errors::PersistenceError;

/// Container key under which all active streams are stored.
pub const ACTIVE_STREAMS_KEY: &str = "active-streaming";

/// String key-value storage collaborator.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a data directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub session_id: String,
    pub relay_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_post_id: Option<String>,
    /// Public page of the stream on the hosting service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

impl StreamInfo {
    pub fn new(session_id: impl Into<String>, relay_address: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            relay_address: relay_address.into(),
            external_post_id: None,
            external_url: None,
        }
    }
}

/// Fields to merge into a record; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfoPatch {
    pub session_id: Option<String>,
    pub relay_address: Option<String>,
    pub external_post_id: Option<String>,
    pub external_url: Option<String>,
}

impl StreamInfoPatch {
    /// A fresh record, when the patch carries the required fields.
    fn into_new(self) -> Option<StreamInfo> {
        let mut info = StreamInfo::new(self.session_id?, self.relay_address?);
        info.external_post_id = self.external_post_id;
        info.external_url = self.external_url;
        Some(info)
    }

    fn apply(self, info: &mut StreamInfo) {
        if let Some(v) = self.session_id {
            info.session_id = v;
        }
        if let Some(v) = self.relay_address {
            info.relay_address = v;
        }
        if let Some(v) = self.external_post_id {
            info.external_post_id = Some(v);
        }
        if let Some(v) = self.external_url {
            info.external_url = Some(v);
        }
    }
}

/// Active stream records keyed by account address. All records, including
/// those of other local sessions, share one container.
#[derive(Clone)]
pub struct ActiveStreams {
    store: Arc<dyn KeyValueStore>,
}

impl ActiveStreams {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn read_all(&self) -> Result<BTreeMap<String, StreamInfo>, PersistenceError> {
        match self.store.get(ACTIVE_STREAMS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn get(&self, address: &str) -> Result<Option<StreamInfo>, PersistenceError> {
        Ok(self.read_all()?.remove(address))
    }

    pub fn save(&self, address: &str, info: StreamInfo) -> Result<(), PersistenceError> {
        let mut all = self.read_all()?;
        all.insert(address.to_string(), info);
        self.write_all(&all)
    }

    /// Merge `patch` into the record for `address`, creating the record
    /// when missing. Returns the merged record, or `None` without writing
    /// when there is no record and the patch lacks a session id or relay
    /// address.
    pub fn update(
        &self,
        address: &str,
        patch: StreamInfoPatch,
    ) -> Result<Option<StreamInfo>, PersistenceError> {
        let mut all = self.read_all()?;
        let merged = match all.get_mut(address) {
            Some(info) => {
                patch.apply(info);
                info.clone()
            }
            None => {
                let Some(info) = patch.into_new() else {
                    return Ok(None);
                };
                all.insert(address.to_string(), info.clone());
                info
            }
        };
        self.write_all(&all)?;
        Ok(Some(merged))
    }

    pub fn delete(&self, address: &str) -> Result<Option<StreamInfo>, PersistenceError> {
        let mut all = self.read_all()?;
        let removed = all.remove(address);
        if removed.is_some() {
            self.write_all(&all)?;
        }
        Ok(removed)
    }

    /// Saved record for `address` if `checker` still approves of it. A
    /// rejected record is deleted.
    pub async fn continue_streaming<F, Fut>(
        &self,
        address: &str,
        checker: F,
    ) -> Result<Option<StreamInfo>, PersistenceError>
    where
        F: FnOnce(StreamInfo) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(saved) = self.get(address)? else {
            return Ok(None);
        };
        if checker(saved.clone()).await {
            tracing::info!(address, session = %saved.session_id, "resuming saved stream");
            return Ok(Some(saved));
        }
        tracing::info!(address, "saved stream rejected, discarding");
        self.delete(address)?;
        Ok(None)
    }

    fn write_all(&self, all: &BTreeMap<String, StreamInfo>) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(all)?;
        self.store.set(ACTIVE_STREAMS_KEY, &raw)
    }
}
