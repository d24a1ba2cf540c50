mod local;
pub mod rows;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::core::clock::Clock;
use crate::core::config::{AppSettings, FileMode};
use crate::core::model::{Agent, LedgerEntry};
use crate::core::store::Store;

pub use local::LocalFileService;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot express {} as a file URL", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to record '{file_name}' in the file log: {reason}")]
    Ledger { file_name: String, reason: String },
}

/// Destination for staged files. Writes the bytes, then appends the ledger
/// entry; the ledger is authoritative, so a ledger failure removes the
/// written file again.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn transfer(
        &self,
        bytes: &[u8],
        file_name: &str,
        agent: &Agent,
    ) -> Result<LedgerEntry, PersistenceError>;
}

pub fn file_service(settings: &AppSettings, store: Store, clock: Arc<dyn Clock>) -> Arc<dyn FileService> {
    match settings.storage.mode {
        FileMode::Local => Arc::new(LocalFileService::new(settings.share_root(), store, clock)),
    }
}
