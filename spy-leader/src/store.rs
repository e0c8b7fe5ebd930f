use crate::{LeaderError, LeaderResult};
use serde::{Deserialize, Serialize};
use spy_core::NodeState;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Election state that survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedElection {
    pub term: u64,
    pub role: NodeState,
}

impl Default for PersistedElection {
    fn default() -> Self {
        Self {
            term: 0,
            role: NodeState::Follower,
        }
    }
}

/// File-based term storage inside the election data directory.
///
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct TermStore {
    state_file_path: PathBuf,
}

impl TermStore {
    /// Open the store, creating `data_dir` if it does not exist.
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> LeaderResult<Self> {
        let data_dir = data_dir.as_ref();

        fs::create_dir_all(data_dir)
            .await
            .map_err(|e| LeaderError::StorageError {
                reason: format!("Failed to create data directory {}: {}", data_dir.display(), e),
            })?;

        Ok(Self {
            state_file_path: data_dir.join("election.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file_path
    }

    pub async fn save(&self, state: &PersistedElection) -> LeaderResult<()> {
        let data = serde_json::to_vec(state).map_err(|e| LeaderError::StorageError {
            reason: format!("Failed to encode election state: {}", e),
        })?;

        let temp_file_path = self.state_file_path.with_extension("tmp");
        fs::write(&temp_file_path, &data)
            .await
            .map_err(|e| LeaderError::StorageError {
                reason: format!("Failed to write election state to temp file: {}", e),
            })?;

        fs::rename(&temp_file_path, &self.state_file_path)
            .await
            .map_err(|e| LeaderError::StorageError {
                reason: format!("Failed to rename temp file to state file: {}", e),
            })?;

        Ok(())
    }

    /// Load the persisted state; `None` on first start.
    pub async fn load(&self) -> LeaderResult<Option<PersistedElection>> {
        let data = match fs::read(&self.state_file_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LeaderError::StorageError {
                    reason: format!("Failed to read election state: {}", e),
                })
            }
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| LeaderError::StorageError {
                reason: format!("Corrupt election state in {}: {}", self.state_file_path.display(), e),
            })
    }
}
