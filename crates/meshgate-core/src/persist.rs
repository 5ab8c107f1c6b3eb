// ── State persistence ──
//
// Clients and rules survive restarts in a single JSON document. Writes go
// to a sibling temp file first and are renamed into place, so a crash
// mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{ApplyStatus, RuleSet, VpnClient};

/// Current on-disk format.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub clients: Vec<VpnClient>,
    #[serde(default)]
    pub rules: Vec<RuleSet>,
    #[serde(default)]
    pub apply_status: Option<ApplyStatus>,
}

pub struct StateFile {
    path: PathBuf,
    /// One writer at a time; concurrent saves would share the temp file.
    lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. A missing file is not an error.
    pub async fn load(&self) -> Result<Option<PersistedState>, CoreError> {
        let _guard = self.lock.lock().await;
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(&e)),
        };
        let state: PersistedState = serde_json::from_slice(&bytes).map_err(|e| self.error(&e))?;
        if state.version > STATE_VERSION {
            return Err(CoreError::Persistence {
                path: self.path.display().to_string(),
                reason: format!(
                    "state version {} is newer than supported version {STATE_VERSION}",
                    state.version
                ),
            });
        }
        debug!(path = %self.path.display(), clients = state.clients.len(), "state loaded");
        Ok(Some(state))
    }

    /// Write `state` atomically.
    pub async fn save(&self, state: &PersistedState) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let body = serde_json::to_vec_pretty(state).map_err(|e| self.error(&e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(&e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| self.error(&e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error(&e))?;

        debug!(path = %self.path.display(), bytes = body.len(), "state saved");
        Ok(())
    }

    fn error(&self, err: &dyn std::fmt::Display) -> CoreError {
        CoreError::Persistence {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{BackendRef, ObservedClient};

    fn sample() -> PersistedState {
        let client = VpnClient::discovered(
            ObservedClient {
                source: BackendRef::Headscale { node_id: 4 },
                name: "desk".into(),
                ip: "100.64.0.4".parse().unwrap(),
                online: true,
            },
            Utc::now(),
        );
        PersistedState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            clients: vec![client],
            rules: Vec::new(),
            apply_status: None,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested/state.json"));
        let state = sample();
        file.save(&state).await.unwrap();

        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded.clients[0].id, state.clients[0].id);
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn newer_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let mut state = sample();
        state.version = STATE_VERSION + 1;
        file.save(&state).await.unwrap();
        assert!(matches!(
            file.load().await,
            Err(CoreError::Persistence { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(StateFile::new(path).load().await.is_err());
    }
}
