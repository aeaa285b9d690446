//! Device session registry.
//!
//! Durable mapping from device identity to its current refresh/access nonces
//! and bound workspaces. Persists to a JSON file when a path is configured;
//! persistence is best-effort and never fails the mutation that triggered it.
//!
//! A reverse index (workspace -> bound-device count) is maintained on every
//! bind/unbind so `remove_device` can report which workspaces the removal
//! orphaned without scanning all sessions. Mutations and the orphan
//! computation run under one exclusive lock.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RegistryError;

/// A paired device and its current credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    /// Device identity minted at first pairing exchange.
    pub device_id: Uuid,
    /// Nonce of the device's current refresh token.
    pub refresh_nonce: Uuid,
    /// When the current refresh token expires.
    pub refresh_expires_at: DateTime<Utc>,
    /// Nonce of the device's current access token.
    pub access_nonce: Uuid,
    /// When the current access token expires.
    pub access_expires_at: DateTime<Utc>,
    /// Workspaces this device is bound to.
    #[serde(default)]
    pub workspaces: BTreeSet<String>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<Uuid, DeviceSession>,
    /// workspace id -> number of devices bound to it.
    workspace_refs: HashMap<String, usize>,
}

impl RegistryState {
    fn rebuild_refs(&mut self) {
        self.workspace_refs.clear();
        for session in self.sessions.values() {
            for ws in &session.workspaces {
                *self.workspace_refs.entry(ws.clone()).or_insert(0) += 1;
            }
        }
    }
}

/// Registry of paired devices.
///
/// Cheap to clone; clones share state. All mutations serialize through one
/// write lock, so bind/unbind and orphan computation are atomic relative to
/// each other.
#[derive(Clone)]
pub struct AuthRegistry {
    state: Arc<RwLock<RegistryState>>,
    persist_path: Option<PathBuf>,
}

impl AuthRegistry {
    /// Create an empty, non-persistent registry.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            persist_path: None,
        }
    }

    /// Create a registry backed by a JSON file.
    ///
    /// Loads existing state if the file is present; an unreadable or corrupt
    /// file is logged and treated as empty rather than refusing to start.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut state = RegistryState::default();
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<Uuid, DeviceSession>>(&bytes) {
                Ok(sessions) => {
                    state.sessions = sessions;
                    state.rebuild_refs();
                    tracing::info!(
                        path = %path.display(),
                        devices = state.sessions.len(),
                        "loaded device registry"
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt registry file, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read registry file, starting empty");
            }
        }
        Self {
            state: Arc::new(RwLock::new(state)),
            persist_path: Some(path),
        }
    }

    /// Upsert a device's current nonces. Covers both the initial pairing
    /// exchange and refresh rotation; workspace bindings survive rotation.
    pub async fn register_device(
        &self,
        device_id: Uuid,
        refresh_nonce: Uuid,
        refresh_expires_at: DateTime<Utc>,
        access_nonce: Uuid,
        access_expires_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        state
            .sessions
            .entry(device_id)
            .and_modify(|s| {
                s.refresh_nonce = refresh_nonce;
                s.refresh_expires_at = refresh_expires_at;
                s.access_nonce = access_nonce;
                s.access_expires_at = access_expires_at;
            })
            .or_insert_with(|| DeviceSession {
                device_id,
                refresh_nonce,
                refresh_expires_at,
                access_nonce,
                access_expires_at,
                workspaces: BTreeSet::new(),
            });
        self.persist(&state);
    }

    /// Look up a device session.
    pub async fn get_device(&self, device_id: Uuid) -> Option<DeviceSession> {
        self.state.read().await.sessions.get(&device_id).cloned()
    }

    /// All known device sessions, ordered by device id.
    pub async fn list_devices(&self) -> Vec<DeviceSession> {
        let state = self.state.read().await;
        let mut list: Vec<DeviceSession> = state.sessions.values().cloned().collect();
        list.sort_by_key(|s| s.device_id);
        list
    }

    /// Bind a workspace to a device.
    pub async fn bind_workspace(
        &self,
        device_id: Uuid,
        workspace_id: &str,
    ) -> Result<(), RegistryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(&device_id)
            .ok_or(RegistryError::DeviceNotFound { device_id })?;
        if session.workspaces.insert(workspace_id.to_string()) {
            *state
                .workspace_refs
                .entry(workspace_id.to_string())
                .or_insert(0) += 1;
        }
        self.persist(&guard);
        Ok(())
    }

    /// Unbind a workspace from a device. Unknown workspace ids are a no-op.
    pub async fn unbind_workspace(
        &self,
        device_id: Uuid,
        workspace_id: &str,
    ) -> Result<(), RegistryError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(&device_id)
            .ok_or(RegistryError::DeviceNotFound { device_id })?;
        if session.workspaces.remove(workspace_id) {
            decrement_ref(&mut state.workspace_refs, workspace_id);
        }
        self.persist(&guard);
        Ok(())
    }

    /// Delete a device session.
    ///
    /// Returns the workspaces orphaned by the removal: those for which this
    /// device held the last binding. The caller is responsible for forwarding
    /// them to whatever cleanup the deployment wants (see [`WorkspaceCleanup`]).
    pub async fn remove_device(&self, device_id: Uuid) -> Result<Vec<String>, RegistryError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .remove(&device_id)
            .ok_or(RegistryError::DeviceNotFound { device_id })?;

        let mut orphaned = Vec::new();
        for ws in &session.workspaces {
            if decrement_ref(&mut state.workspace_refs, ws) == 0 {
                orphaned.push(ws.clone());
            }
        }
        orphaned.sort();
        self.persist(&state);

        tracing::info!(%device_id, orphaned = orphaned.len(), "device removed");
        Ok(orphaned)
    }

    /// Number of devices currently bound to a workspace.
    pub async fn workspace_binding_count(&self, workspace_id: &str) -> usize {
        self.state
            .read()
            .await
            .workspace_refs
            .get(workspace_id)
            .copied()
            .unwrap_or(0)
    }

    /// Best-effort save, called while holding the write lock so saves cannot
    /// interleave. Failures are logged and swallowed: registry updates must
    /// never fail an already-successful token operation.
    fn persist(&self, state: &RegistryState) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Err(e) = write_atomically(path, &state.sessions) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist device registry");
        }
    }
}

fn write_atomically(
    path: &PathBuf,
    sessions: &HashMap<Uuid, DeviceSession>,
) -> Result<(), RegistryError> {
    let bytes =
        serde_json::to_vec_pretty(sessions).map_err(|e| RegistryError::Persist(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RegistryError::Persist(e.to_string()))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| RegistryError::Persist(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| RegistryError::Persist(e.to_string()))?;
    Ok(())
}

/// Decrement a workspace refcount, dropping the entry at zero. Returns the
/// new count.
fn decrement_ref(refs: &mut HashMap<String, usize>, workspace_id: &str) -> usize {
    match refs.get_mut(workspace_id) {
        Some(count) if *count > 1 => {
            *count -= 1;
            *count
        }
        Some(_) => {
            refs.remove(workspace_id);
            0
        }
        None => 0,
    }
}

/// Collaborator notified of workspaces left with zero bound devices.
///
/// The registry never calls this itself; callers forward the orphan list
/// returned by [`AuthRegistry::remove_device`].
#[async_trait]
pub trait WorkspaceCleanup: Send + Sync {
    async fn workspaces_orphaned(&self, workspace_ids: &[String]);
}

/// Default cleanup collaborator: records the orphans in the log and nothing
/// else.
pub struct LoggingCleanup;

#[async_trait]
impl WorkspaceCleanup for LoggingCleanup {
    async fn workspaces_orphaned(&self, workspace_ids: &[String]) {
        if !workspace_ids.is_empty() {
            tracing::info!(workspaces = ?workspace_ids, "workspaces orphaned by device removal");
        }
    }
}
