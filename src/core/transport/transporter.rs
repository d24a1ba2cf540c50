use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Endpoint, FileServers, base_name};
use crate::core::clock::Clock;
use crate::core::credentials::CredentialCipher;
use crate::core::error::{AgentError, PersistenceError};
use crate::core::model::{Agent, AgentKind, Timestamp};
use crate::core::schedule;
use crate::core::storage::FileService;
use crate::core::store::Store;

const TRANSPORT_KINDS: [AgentKind; 2] = [AgentKind::Sftp, AgentKind::Ftps];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportSummary {
    pub agents_run: usize,
    pub agents_failed: usize,
    pub files_staged: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
}

/// Pulls new files from remote servers for a connection's due SFTP and FTPS
/// agents and stages each unseen file once.
pub struct FileTransporter {
    store: Store,
    servers: FileServers,
    sink: Arc<dyn FileService>,
    cipher: Arc<CredentialCipher>,
    clock: Arc<dyn Clock>,
}

impl FileTransporter {
    pub fn new(
        store: Store,
        servers: FileServers,
        sink: Arc<dyn FileService>,
        cipher: Arc<CredentialCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            servers,
            sink,
            cipher,
            clock,
        }
    }

    pub async fn run(&self, connection_id: i64, cancel: &CancellationToken) -> Result<TransportSummary> {
        let agents = self.store.load_agents(connection_id, &TRANSPORT_KINDS).await?;
        let mut summary = TransportSummary::default();
        let mut last_runs: Vec<(i64, Timestamp)> = Vec::new();

        for agent in &agents {
            if cancel.is_cancelled() {
                info!("File transport for connection {} cancelled", connection_id);
                break;
            }
            if !schedule::is_due(agent, self.clock.now()) {
                debug!("Agent '{}' is not due", agent.name);
                continue;
            }

            summary.agents_run += 1;
            match self.run_agent(agent, &mut summary).await {
                Ok(()) => last_runs.push((agent.id, self.clock.now())),
                Err(e) => {
                    summary.agents_failed += 1;
                    error!(
                        "Agent '{}' (connection {}) failed with {} error: {}",
                        agent.name,
                        connection_id,
                        e.category(),
                        e
                    );
                }
            }
        }

        self.store.record_last_executed(&last_runs).await?;
        info!(
            "File transport for connection {}: {} agent(s) run, {} file(s) staged, {} skipped",
            connection_id, summary.agents_run, summary.files_staged, summary.files_skipped
        );
        Ok(summary)
    }

    async fn run_agent(&self, agent: &Agent, summary: &mut TransportSummary) -> Result<(), AgentError> {
        let server = self.servers.for_kind(agent.kind).ok_or_else(|| {
            AgentError::configuration(&agent.name, format!("no file server for {}", agent.kind.as_str()))
        })?;
        let endpoint = Endpoint::for_agent(agent, &self.cipher)?;
        info!(
            "Agent '{}' checking {}:{} {} for '{}'",
            agent.name,
            endpoint.host,
            endpoint.port,
            endpoint.directory,
            endpoint.pattern.as_str()
        );

        let paths = match server.list_files(&endpoint).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(
                    "Agent '{}' could not list files on {} ({}): {}",
                    agent.name,
                    e.host(),
                    e.category(),
                    e
                );
                Vec::new()
            }
        };

        for path in &paths {
            let file_name = base_name(path);
            let seen = self
                .store
                .file_exists_in_log(agent.id, file_name)
                .await
                .map_err(|e| PersistenceError::Ledger {
                    file_name: file_name.to_string(),
                    reason: format!("{:#}", e),
                })?;
            if seen {
                debug!("Agent '{}' already staged '{}'", agent.name, file_name);
                summary.files_skipped += 1;
                continue;
            }

            let bytes = match server.download(&endpoint, path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Agent '{}' could not download {} from {} ({}): {}",
                        agent.name,
                        path,
                        e.host(),
                        e.category(),
                        e
                    );
                    summary.files_failed += 1;
                    continue;
                }
            };

            self.sink.transfer(&bytes, file_name, agent).await?;
            summary.files_staged += 1;
        }

        Ok(())
    }
}
