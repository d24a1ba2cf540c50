//! One trigger, one cycle: job status bracket around file generation
//! followed by file transport.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::clock::Clock;
use super::config::AppSettings;
use super::credentials::CredentialCipher;
use super::generation::{FileGenerator, GenerationSummary, Preprocessors};
use super::storage;
use super::store::Store;
use super::transport::{FileServers, FileTransporter, TransportSummary};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub connections: usize,
    pub connections_failed: usize,
    pub generation: GenerationSummary,
    pub transport: TransportSummary,
}

impl CycleSummary {
    fn absorb(&mut self, generation: GenerationSummary, transport: TransportSummary) {
        self.generation.agents_run += generation.agents_run;
        self.generation.agents_failed += generation.agents_failed;
        self.generation.files_staged += generation.files_staged;
        self.generation.files_skipped += generation.files_skipped;
        self.transport.agents_run += transport.agents_run;
        self.transport.agents_failed += transport.agents_failed;
        self.transport.files_staged += transport.files_staged;
        self.transport.files_skipped += transport.files_skipped;
        self.transport.files_failed += transport.files_failed;
    }

    pub fn files_staged(&self) -> usize {
        self.generation.files_staged + self.transport.files_staged
    }

    pub fn agents_failed(&self) -> usize {
        self.generation.agents_failed + self.transport.agents_failed
    }
}

pub struct JobRunner {
    store: Store,
    generator: FileGenerator,
    transporter: FileTransporter,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    pub fn new(
        store: Store,
        generator: FileGenerator,
        transporter: FileTransporter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            generator,
            transporter,
            clock,
        }
    }

    /// Wire both pipelines from settings, sharing one sink and one store.
    pub fn from_settings(settings: &AppSettings, store: Store, clock: Arc<dyn Clock>) -> Result<Self> {
        let cipher = CredentialCipher::new(settings.credentials.encryption_key.as_deref())
            .context("Invalid credentials.encryption_key")?;
        let sink = storage::file_service(settings, store.clone(), clock.clone());

        let generator = FileGenerator::new(
            store.clone(),
            Preprocessors::from_settings(settings),
            sink.clone(),
            clock.clone(),
            settings.preprocessors.allow_unrestricted_scripts,
        );
        let transporter = FileTransporter::new(
            store.clone(),
            FileServers::from_settings(&settings.transport),
            sink,
            Arc::new(cipher),
            clock.clone(),
        );
        Ok(Self::new(store, generator, transporter, clock))
    }

    /// Run a single connection's cycle inside its own job status bracket.
    pub async fn run_cycle(&self, connection_id: i64, cancel: &CancellationToken) -> Result<CycleSummary> {
        self.store.mark_job_started(self.clock.now()).await?;
        let result = self.run_connection(connection_id, cancel).await;
        self.store.mark_job_completed(self.clock.now()).await?;

        let (generation, transport) = result?;
        let mut summary = CycleSummary {
            connections: 1,
            ..Default::default()
        };
        summary.absorb(generation, transport);
        Ok(summary)
    }

    /// Every connection in id order under a single bracket. A connection that
    /// errors is logged and the next one still runs.
    pub async fn run_all(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        self.store.mark_job_started(self.clock.now()).await?;
        let result = self.run_connections(cancel).await;
        self.store.mark_job_completed(self.clock.now()).await?;
        result
    }

    async fn run_connections(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let connections = self.store.list_connections().await?;
        let mut summary = CycleSummary::default();

        for connection in &connections {
            if cancel.is_cancelled() {
                info!("Cycle cancelled before connection '{}'", connection.name);
                break;
            }
            summary.connections += 1;
            match self.run_connection(connection.id, cancel).await {
                Ok((generation, transport)) => summary.absorb(generation, transport),
                Err(e) => {
                    summary.connections_failed += 1;
                    error!(
                        "Cycle for connection '{}' ({}) failed: {:#}",
                        connection.name, connection.id, e
                    );
                }
            }
        }

        info!(
            "Cycle finished: {} connection(s), {} file(s) staged, {} agent(s) failed",
            summary.connections,
            summary.files_staged(),
            summary.agents_failed()
        );
        Ok(summary)
    }

    async fn run_connection(
        &self,
        connection_id: i64,
        cancel: &CancellationToken,
    ) -> Result<(GenerationSummary, TransportSummary)> {
        let generation = self
            .generator
            .run(connection_id, cancel)
            .await
            .with_context(|| format!("File generation failed for connection {}", connection_id))?;
        let transport = self
            .transporter
            .run(connection_id, cancel)
            .await
            .with_context(|| format!("File transport failed for connection {}", connection_id))?;
        Ok((generation, transport))
    }
}
