//! Persistence backends for recovery state

use super::error::CheckpointError;
use super::types::RecoveryState;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value persistence for recovery state, keyed by entity and filters hash
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(
        &self,
        entity_name: &str,
        filters_hash: &str,
    ) -> Result<Option<RecoveryState>, CheckpointError>;

    async fn save(
        &self,
        entity_name: &str,
        filters_hash: &str,
        state: &RecoveryState,
    ) -> Result<(), CheckpointError>;

    /// Remove every checkpoint for `entity_name`, returning how many were removed
    async fn clear(&self, entity_name: &str) -> Result<usize, CheckpointError>;
}

/// Process-local store, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<(String, String), RecoveryState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(
        &self,
        entity_name: &str,
        filters_hash: &str,
    ) -> Result<Option<RecoveryState>, CheckpointError> {
        let states = self.states.read().await;
        Ok(states
            .get(&(entity_name.to_string(), filters_hash.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        entity_name: &str,
        filters_hash: &str,
        state: &RecoveryState,
    ) -> Result<(), CheckpointError> {
        self.states.write().await.insert(
            (entity_name.to_string(), filters_hash.to_string()),
            state.clone(),
        );
        Ok(())
    }

    async fn clear(&self, entity_name: &str) -> Result<usize, CheckpointError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|(entity, _), _| entity != entity_name);
        Ok(before - states.len())
    }
}

/// JSON files laid out as `<base>/<entity>/<filters hash>.json`.
///
/// Names outside `[A-Za-z0-9_-]` are rewritten and suffixed with a digest of
/// the original, so distinct entities never share a directory.
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entity_dir(&self, entity_name: &str) -> PathBuf {
        self.base_dir.join(path_component(entity_name))
    }

    fn checkpoint_path(&self, entity_name: &str, filters_hash: &str) -> PathBuf {
        self.entity_dir(entity_name)
            .join(format!("{}.json", path_component(filters_hash)))
    }
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Plain names pass through. Anything else becomes `<sanitized>.<digest>`;
/// the `.` cannot occur in a plain name, so the two forms never meet.
fn path_component(name: &str) -> String {
    if !name.is_empty() && name.chars().all(is_plain) {
        return name.to_string();
    }
    let sanitized: String = name
        .chars()
        .map(|c| if is_plain(c) { c } else { '_' })
        .collect();
    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{sanitized}.{suffix}")
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(
        &self,
        entity_name: &str,
        filters_hash: &str,
    ) -> Result<Option<RecoveryState>, CheckpointError> {
        let path = self.checkpoint_path(entity_name, filters_hash);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let state = serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
            location: path.display().to_string(),
            source,
        })?;
        Ok(Some(state))
    }

    async fn save(
        &self,
        entity_name: &str,
        filters_hash: &str,
        state: &RecoveryState,
    ) -> Result<(), CheckpointError> {
        let dir = self.entity_dir(entity_name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let path = self.checkpoint_path(entity_name, filters_hash);
        let temp_path = path.with_extension("tmp");

        let json =
            serde_json::to_string_pretty(state).map_err(|source| CheckpointError::Serialize {
                entity: entity_name.to_string(),
                source,
            })?;

        fs::write(&temp_path, json)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(
            "Wrote checkpoint {} (batch #{})",
            path.display(),
            state.last_batch_index
        );
        Ok(())
    }

    async fn clear(&self, entity_name: &str) -> Result<usize, CheckpointError> {
        let dir = self.entity_dir(entity_name);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
