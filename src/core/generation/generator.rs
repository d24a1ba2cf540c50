use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Preprocessors, PreprocessorError, ProcessOptions, TracingProcessLog};
use crate::core::clock::Clock;
use crate::core::error::{AgentError, PersistenceError};
use crate::core::model::{Agent, AgentKind, Connection, Timestamp};
use crate::core::schedule;
use crate::core::storage::FileService;
use crate::core::store::Store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    pub agents_run: usize,
    pub agents_failed: usize,
    pub files_staged: usize,
    pub files_skipped: usize,
}

enum Outcome {
    Staged,
    AlreadyStaged,
}

/// Runs a connection's due generator agents and stages the file each one
/// produces.
pub struct FileGenerator {
    store: Store,
    preprocessors: Preprocessors,
    sink: Arc<dyn FileService>,
    clock: Arc<dyn Clock>,
    allow_unrestricted_scripts: bool,
}

impl FileGenerator {
    pub fn new(
        store: Store,
        preprocessors: Preprocessors,
        sink: Arc<dyn FileService>,
        clock: Arc<dyn Clock>,
        allow_unrestricted_scripts: bool,
    ) -> Self {
        Self {
            store,
            preprocessors,
            sink,
            clock,
            allow_unrestricted_scripts,
        }
    }

    pub async fn run(&self, connection_id: i64, cancel: &CancellationToken) -> Result<GenerationSummary> {
        let connection = self.store.get_connection(connection_id).await?;
        let agents = self
            .store
            .load_agents(connection_id, &[AgentKind::Script])
            .await?;
        let mut summary = GenerationSummary::default();
        let mut last_runs: Vec<(i64, Timestamp)> = Vec::new();

        for agent in &agents {
            if cancel.is_cancelled() {
                info!("File generation for connection {} cancelled", connection_id);
                break;
            }
            if !schedule::is_due(agent, self.clock.now()) {
                debug!("Agent '{}' is not due", agent.name);
                continue;
            }

            summary.agents_run += 1;
            match self.run_agent(agent, connection.as_ref()).await {
                Ok(outcome) => {
                    match outcome {
                        Outcome::Staged => summary.files_staged += 1,
                        Outcome::AlreadyStaged => summary.files_skipped += 1,
                    }
                    last_runs.push((agent.id, self.clock.now()));
                }
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
            "File generation for connection {}: {} agent(s) run, {} file(s) staged",
            connection_id, summary.agents_run, summary.files_staged
        );
        Ok(summary)
    }

    async fn run_agent(&self, agent: &Agent, connection: Option<&Connection>) -> Result<Outcome, AgentError> {
        if let Some(reason) = &agent.script_error {
            return Err(AgentError::configuration(&agent.name, reason.clone()));
        }
        let script = agent
            .script
            .as_ref()
            .ok_or_else(|| AgentError::configuration(&agent.name, "no generator script assigned"))?;
        let preprocessor = self.preprocessors.for_script(script.kind).ok_or_else(|| {
            AgentError::configuration(
                &agent.name,
                format!(
                    "script '{}' is a {} and cannot generate files",
                    script.name,
                    script.kind.as_str()
                ),
            )
        })?;

        let connection = if script.requires_connection {
            Some(connection.cloned().ok_or_else(|| {
                AgentError::configuration(&agent.name, "script requires a connection that does not exist")
            })?)
        } else {
            None
        };
        let options = ProcessOptions {
            requires_connection: script.requires_connection,
            connection,
            cache_key: agent.id.to_string(),
            sandboxed: !(script.unrestricted && self.allow_unrestricted_scripts),
        };

        info!(
            "Agent '{}' running generator '{}'{}",
            agent.name,
            script.name,
            if options.sandboxed { " (sandboxed)" } else { "" }
        );
        let log = TracingProcessLog::new(&agent.name);
        let path = preprocessor.generate(script, &options, &log).await?;

        let file_name = generated_file_name(&path)?;
        let seen = self
            .store
            .file_exists_in_log(agent.id, &file_name)
            .await
            .map_err(|e| PersistenceError::Ledger {
                file_name: file_name.clone(),
                reason: format!("{:#}", e),
            })?;
        if seen {
            error!(
                "Agent '{}' ({}) generated '{}' which was already staged; skipping",
                agent.name, agent.id, file_name
            );
            return Ok(Outcome::AlreadyStaged);
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PreprocessorError::GeneratedFile {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        self.sink.transfer(&bytes, &file_name, agent).await?;
        Ok(Outcome::Staged)
    }
}

fn generated_file_name(path: &Path) -> Result<String, PreprocessorError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| PreprocessorError::GeneratedFile {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::generation::{Preprocessor, ProcessLog};
    use crate::core::model::{Script, ScriptKind};
    use crate::core::storage::LocalFileService;
    use crate::core::store::fixtures::AgentSeed;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    const THURSDAY: &str = "2024-06-06T12:50:00+00:00";
    const NEXT_THURSDAY: &str = "2024-06-13T12:50:00+00:00";

    /// Writes `<out_dir>/<name>` where the name comes from the script content,
    /// or fails when the content is `fail`.
    struct FakeGenerator {
        out_dir: PathBuf,
        seen: Mutex<Vec<ProcessOptions>>,
    }

    #[async_trait]
    impl Preprocessor for FakeGenerator {
        async fn generate(
            &self,
            script: &Script,
            options: &ProcessOptions,
            _log: &dyn ProcessLog,
        ) -> Result<PathBuf, PreprocessorError> {
            self.seen.lock().unwrap().push(options.clone());
            let name = script.content.clone().unwrap_or_default();
            if name == "fail" {
                return Err(PreprocessorError::ScriptErrors {
                    command: script.name.clone(),
                    messages: "api unreachable".into(),
                });
            }
            let path = self.out_dir.join(&name);
            std::fs::write(&path, b"id,name\n1,a\n").unwrap();
            Ok(path)
        }
    }

    struct Harness {
        share: tempfile::TempDir,
        _out: tempfile::TempDir,
        store: Store,
        clock: Arc<FixedClock>,
        fake: Arc<FakeGenerator>,
    }

    impl Harness {
        async fn new() -> Self {
            let store = Store::open_in_memory().unwrap();
            store.seed_connection(1, "District").await.unwrap();
            let out = tempfile::tempdir().unwrap();
            Self {
                share: tempfile::tempdir().unwrap(),
                fake: Arc::new(FakeGenerator {
                    out_dir: out.path().to_path_buf(),
                    seen: Mutex::new(Vec::new()),
                }),
                _out: out,
                store,
                clock: Arc::new(FixedClock::at(THURSDAY)),
            }
        }

        fn generator(&self, allow_unrestricted: bool) -> FileGenerator {
            FileGenerator::new(
                self.store.clone(),
                Preprocessors::new(self.fake.clone(), self.fake.clone()),
                Arc::new(LocalFileService::new(
                    self.share.path().to_path_buf(),
                    self.store.clone(),
                    self.clock.clone(),
                )),
                self.clock.clone(),
                allow_unrestricted,
            )
        }

        async fn seed(&self, agent_id: i64, script: Script) {
            let script_id = script.id;
            self.store.seed_script(&script).await.unwrap();
            self.store
                .seed_agent(&AgentSeed::new(agent_id, 1, AgentKind::Script).script(script_id))
                .await
                .unwrap();
            self.store.seed_trigger(agent_id, 4, 12, 30).await.unwrap();
        }

        fn options_seen(&self) -> Vec<ProcessOptions> {
            self.fake.seen.lock().unwrap().clone()
        }
    }

    fn generator_script(id: i64, output: &str) -> Script {
        Script {
            id,
            name: format!("script-{}", id),
            kind: ScriptKind::InlineGenerator,
            content: Some(output.into()),
            executable_path: None,
            executable_arguments: Vec::new(),
            requires_connection: false,
            unrestricted: false,
        }
    }

    #[tokio::test]
    async fn stages_generated_file_and_advances_last_run() {
        let h = Harness::new().await;
        h.seed(7, generator_script(1, "roster.csv")).await;

        let summary = h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.files_staged, 1);

        let staged = h.store.files_for_agent(7).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].file_name, "roster.csv");
        assert_eq!(staged[0].rows, 1);
        assert!(h.store.last_executed(7).await.unwrap().is_some());

        let options = h.options_seen();
        assert_eq!(options[0].cache_key, "7");
        assert!(options[0].sandboxed);
        assert!(options[0].connection.is_none());
    }

    #[tokio::test]
    async fn connection_is_passed_only_when_required() {
        let h = Harness::new().await;
        let mut script = generator_script(1, "a.csv");
        script.requires_connection = true;
        h.seed(1, script).await;

        h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        let options = h.options_seen();
        assert!(options[0].requires_connection);
        assert_eq!(options[0].connection.as_ref().unwrap().id, 1);
    }

    #[tokio::test]
    async fn unrestricted_scripts_run_unsandboxed_only_when_allowed() {
        let h = Harness::new().await;
        let mut script = generator_script(1, "a.csv");
        script.unrestricted = true;
        h.seed(1, script).await;

        h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        h.clock.set(NEXT_THURSDAY);
        h.generator(true).run(1, &CancellationToken::new()).await.unwrap();

        let options = h.options_seen();
        assert!(options[0].sandboxed);
        assert!(!options[1].sandboxed);
    }

    #[tokio::test]
    async fn processor_scripts_are_a_configuration_error() {
        let h = Harness::new().await;
        let mut processor = generator_script(1, "a.csv");
        processor.kind = ScriptKind::InlineProcessor;
        h.seed(1, processor).await;
        h.seed(2, generator_script(2, "b.csv")).await;

        let summary = h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.agents_failed, 1);
        assert_eq!(summary.files_staged, 1);
        assert!(h.store.last_executed(1).await.unwrap().is_none());
        assert!(h.store.last_executed(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn agent_without_script_fails_alone() {
        let h = Harness::new().await;
        h.store
            .seed_agent(&AgentSeed::new(1, 1, AgentKind::Script))
            .await
            .unwrap();
        h.store.seed_trigger(1, 4, 12, 30).await.unwrap();
        h.seed(2, generator_script(2, "b.csv")).await;

        let summary = h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.agents_failed, 1);
        assert_eq!(summary.files_staged, 1);
    }

    #[tokio::test]
    async fn failing_script_does_not_stop_siblings() {
        let h = Harness::new().await;
        h.seed(1, generator_script(1, "fail")).await;
        h.seed(2, generator_script(2, "b.csv")).await;

        let summary = h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.agents_run, 2);
        assert_eq!(summary.agents_failed, 1);
        assert!(h.store.files_for_agent(1).await.unwrap().is_empty());
        assert_eq!(h.store.files_for_agent(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn regenerated_name_is_skipped_but_counts_as_run() {
        let h = Harness::new().await;
        h.seed(1, generator_script(1, "same.csv")).await;

        h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        h.clock.set(NEXT_THURSDAY);
        let second = h.generator(false).run(1, &CancellationToken::new()).await.unwrap();

        assert_eq!(second.files_skipped, 1);
        assert_eq!(h.store.files_for_agent(1).await.unwrap().len(), 1);
        let last = h.store.last_executed(1).await.unwrap().unwrap();
        assert_eq!(last.to_rfc3339(), "2024-06-13T12:50:00+00:00");
    }

    #[tokio::test]
    async fn unreadable_script_row_is_a_configuration_error() {
        let h = Harness::new().await;
        h.store
            .seed_raw_script(1, "external_generator", "[\"--full\", 2024")
            .await
            .unwrap();
        h.store.seed_raw_script(2, "bash_generator", "[]").await.unwrap();
        for (agent_id, script_id) in [(1, 1), (2, 2)] {
            h.store
                .seed_agent(&AgentSeed::new(agent_id, 1, AgentKind::Script).script(script_id))
                .await
                .unwrap();
            h.store.seed_trigger(agent_id, 4, 12, 30).await.unwrap();
        }

        let generator = h.generator(false);
        let agents = h.store.load_agents(1, &[AgentKind::Script]).await.unwrap();
        for agent in &agents {
            match generator.run_agent(agent, None).await {
                Err(AgentError::Configuration { reason, .. }) => {
                    assert!(!reason.contains("no generator script"), "{}", reason);
                }
                _ => panic!("agent {} should fail as misconfigured", agent.id),
            }
        }
        let err = generator.run_agent(&agents[1], None).await.err().unwrap();
        assert!(err.to_string().contains("unknown kind 'bash_generator'"));

        let summary = generator.run(1, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.agents_failed, 2);
        assert!(h.options_seen().is_empty());
    }

    #[tokio::test]
    async fn regenerated_name_is_logged_as_an_error_with_the_agent_id() {
        use crate::logging::LogMakeWriter;

        let h = Harness::new().await;
        h.seed(42, generator_script(1, "same.csv")).await;
        h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        h.clock.set(NEXT_THURSDAY);

        let log_path = h.share.path().join("generator.log");
        let file = std::fs::File::create(&log_path).unwrap();
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(LogMakeWriter {
                file: Some(Arc::new(Mutex::new(file))),
            })
            .finish();
        {
            let _guard = tracing::subscriber::set_default(subscriber);
            h.generator(false).run(1, &CancellationToken::new()).await.unwrap();
        }

        let logged = std::fs::read_to_string(&log_path).unwrap();
        let line = logged
            .lines()
            .find(|l| l.contains("already staged"))
            .unwrap_or_else(|| panic!("no duplicate line in {:?}", logged));
        assert!(line.contains("ERROR"), "{}", line);
        assert!(line.contains("'agent-42' (42)"), "{}", line);
    }

    #[test]
    fn generated_path_must_name_a_file() {
        assert_eq!(
            generated_file_name(Path::new("/tmp/out/roster.csv")).unwrap(),
            "roster.csv"
        );
        assert!(generated_file_name(Path::new("/")).is_err());
    }
}
