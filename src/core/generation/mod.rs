//! File generation: preprocessor strategies that produce a local file, and
//! the pipeline that stages what they produce.

mod external;
mod generator;
mod script;

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, trace, warn};

use crate::core::config::AppSettings;
use crate::core::model::{Connection, Script, ScriptKind};

pub use external::ExternalPreprocessor;
pub use generator::{FileGenerator, GenerationSummary};
pub use script::InlineScriptPreprocessor;

#[derive(Debug, Error)]
pub enum PreprocessorError {
    #[error("external preprocessors are disabled")]
    Disabled,

    #[error("script '{script}' has no {missing}")]
    Incomplete {
        script: String,
        missing: &'static str,
    },

    #[error("cannot prepare working directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("'{command}' exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{command}' wrote to stderr: {stderr}")]
    Stderr { command: String, stderr: String },

    #[error("'{command}' reported errors: {messages}")]
    ScriptErrors { command: String, messages: String },

    #[error("'{command}' must print exactly one file path, printed {lines} line(s)")]
    Output { command: String, lines: usize },

    #[error("generated file {} is unusable: {reason}", .path.display())]
    GeneratedFile { path: PathBuf, reason: String },
}

/// Severity of a record emitted by a preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
}

/// Receives the records a preprocessor emits while it runs.
pub trait ProcessLog: Send + Sync {
    fn log(&self, level: ProcessLogLevel, message: &str);
}

/// Forwards preprocessor records to `tracing`, tagged with the agent.
pub struct TracingProcessLog {
    agent: String,
}

impl TracingProcessLog {
    pub fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
        }
    }
}

impl ProcessLog for TracingProcessLog {
    fn log(&self, level: ProcessLogLevel, message: &str) {
        match level {
            ProcessLogLevel::Trace => trace!("[{}] {}", self.agent, message),
            ProcessLogLevel::Debug => debug!("[{}] {}", self.agent, message),
            ProcessLogLevel::Information => info!("[{}] {}", self.agent, message),
            ProcessLogLevel::Warning => warn!("[{}] {}", self.agent, message),
            ProcessLogLevel::Error => error!("[{}] {}", self.agent, message),
        }
    }
}

/// Per-invocation context handed to a preprocessor.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub requires_connection: bool,
    /// Present only when the script requires it.
    pub connection: Option<Connection>,
    /// Stable key a script may use to cache state between runs.
    pub cache_key: String,
    pub sandboxed: bool,
}

#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Run the script and return the path of the file it produced.
    async fn generate(
        &self,
        script: &Script,
        options: &ProcessOptions,
        log: &dyn ProcessLog,
    ) -> Result<PathBuf, PreprocessorError>;
}

/// Closed mapping from script kind to the strategy that runs it.
#[derive(Clone)]
pub struct Preprocessors {
    inline: Arc<dyn Preprocessor>,
    external: Arc<dyn Preprocessor>,
}

impl Preprocessors {
    pub fn new(inline: Arc<dyn Preprocessor>, external: Arc<dyn Preprocessor>) -> Self {
        Self { inline, external }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        let timeout = Duration::from_secs(settings.preprocessors.timeout_secs);
        Self::new(
            Arc::new(InlineScriptPreprocessor::new(settings.work_dir(), timeout)),
            Arc::new(ExternalPreprocessor::new(
                settings.preprocessors.external_enabled,
                timeout,
            )),
        )
    }

    /// Only generator kinds produce files; processors have no strategy here.
    pub fn for_script(&self, kind: ScriptKind) -> Option<&dyn Preprocessor> {
        match kind {
            ScriptKind::InlineGenerator => Some(self.inline.as_ref()),
            ScriptKind::ExternalGenerator => Some(self.external.as_ref()),
            ScriptKind::InlineProcessor | ScriptKind::ExternalProcessor => None,
        }
    }
}

/// Expose the invocation context to the child process.
fn apply_context(cmd: &mut Command, options: &ProcessOptions) {
    cmd.env("FILESTAGE_CACHE_KEY", &options.cache_key);
    cmd.env(
        "FILESTAGE_REQUIRES_CONNECTION",
        if options.requires_connection { "1" } else { "0" },
    );
    cmd.env("FILESTAGE_SANDBOX", if options.sandboxed { "1" } else { "0" });
    if let Some(connection) = &options.connection {
        let json = serde_json::to_string(connection).unwrap_or_else(|_| "{}".to_string());
        cmd.env("FILESTAGE_CONNECTION", json);
    }
}

struct ProcessOutput {
    status: ExitStatus,
    /// Trimmed, non-empty lines.
    stdout: Vec<String>,
    stderr: Vec<String>,
}

fn non_empty_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_process(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
) -> Result<ProcessOutput, PreprocessorError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| PreprocessorError::Launch {
        command: label.to_string(),
        source,
    })?;
    info!("Preprocessor '{}' started", label);

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(PreprocessorError::Launch {
                command: label.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(PreprocessorError::Timeout {
                command: label.to_string(),
                timeout,
            });
        }
    };
    info!("Preprocessor '{}' exited with {}", label, output.status);

    Ok(ProcessOutput {
        status: output.status,
        stdout: non_empty_lines(&output.stdout),
        stderr: non_empty_lines(&output.stderr),
    })
}

/// The single line a generator prints on stdout.
fn single_path(command: &str, stdout: &[String]) -> Result<PathBuf, PreprocessorError> {
    match stdout {
        [line] => Ok(PathBuf::from(line)),
        _ => Err(PreprocessorError::Output {
            command: command.to_string(),
            lines: stdout.len(),
        }),
    }
}

#[cfg(test)]
pub(crate) struct RecordingLog(std::sync::Mutex<Vec<(ProcessLogLevel, String)>>);

#[cfg(test)]
impl RecordingLog {
    pub fn new() -> Self {
        Self(std::sync::Mutex::new(Vec::new()))
    }

    pub fn records(&self) -> Vec<(ProcessLogLevel, String)> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProcessLog for RecordingLog {
    fn log(&self, level: ProcessLogLevel, message: &str) {
        self.0.lock().unwrap().push((level, message.to_string()));
    }
}
