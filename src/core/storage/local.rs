use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::rows::count_rows;
use super::{FileService, PersistenceError};
use crate::core::clock::Clock;
use crate::core::model::{Agent, FileStatus, LedgerEntry};
use crate::core::store::Store;

/// Stages files on the local filesystem or a mounted share under
/// `<share>/DataImport/Agent-<id>/<uuid>-<name>`.
pub struct LocalFileService {
    share_root: PathBuf,
    store: Store,
    clock: Arc<dyn Clock>,
}

impl LocalFileService {
    pub fn new(share_root: PathBuf, store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            share_root,
            store,
            clock,
        }
    }

    fn agent_dir(&self, agent: &Agent) -> Result<PathBuf, PersistenceError> {
        let dir = self
            .share_root
            .join("DataImport")
            .join(agent.directory_name());
        std::path::absolute(&dir).map_err(|source| PersistenceError::Write { path: dir, source })
    }
}

fn validate_file_name(file_name: &str) -> Result<(), PersistenceError> {
    let bad = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0']);
    if bad {
        return Err(PersistenceError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Could not remove {:?} after failed log write: {}", path, e);
    }
}

#[async_trait]
impl FileService for LocalFileService {
    async fn transfer(
        &self,
        bytes: &[u8],
        file_name: &str,
        agent: &Agent,
    ) -> Result<LedgerEntry, PersistenceError> {
        validate_file_name(file_name)?;

        let dir = self.agent_dir(agent)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| PersistenceError::Write {
                path: dir.clone(),
                source,
            })?;

        let stored = dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
        fs::write(&stored, bytes)
            .await
            .map_err(|source| PersistenceError::Write {
                path: stored.clone(),
                source,
            })?;

        let url = match Url::from_file_path(&stored) {
            Ok(url) => url,
            Err(()) => {
                remove_quietly(&stored).await;
                return Err(PersistenceError::InvalidPath(stored));
            }
        };

        let rows = count_rows(bytes, file_name);
        let logged = self
            .store
            .log_file(
                agent.id,
                file_name,
                url.as_str(),
                rows,
                FileStatus::Uploaded,
                self.clock.now(),
            )
            .await;

        match logged {
            Ok(entry) => {
                info!(
                    "Agent '{}' staged '{}' ({} rows) at {}",
                    agent.name, file_name, rows, url
                );
                Ok(entry)
            }
            Err(e) => {
                remove_quietly(&stored).await;
                Err(PersistenceError::Ledger {
                    file_name: file_name.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}
