use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use super::{
    Preprocessor, PreprocessorError, ProcessLog, ProcessLogLevel, ProcessOptions, apply_context,
    run_process, single_path,
};
use crate::core::model::Script;

/// Runs an external executable that prints the generated file's path.
/// Any stderr output, a non-zero exit or a timeout fails the run.
pub struct ExternalPreprocessor {
    enabled: bool,
    timeout: Duration,
}

impl ExternalPreprocessor {
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self { enabled, timeout }
    }
}

#[async_trait]
impl Preprocessor for ExternalPreprocessor {
    async fn generate(
        &self,
        script: &Script,
        options: &ProcessOptions,
        log: &dyn ProcessLog,
    ) -> Result<PathBuf, PreprocessorError> {
        if !self.enabled {
            warn!("Skipping '{}': external preprocessors are disabled", script.name);
            return Err(PreprocessorError::Disabled);
        }
        let executable = script
            .executable_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| PreprocessorError::Incomplete {
                script: script.name.clone(),
                missing: "executable path",
            })?;

        let mut cmd = Command::new(executable);
        cmd.args(&script.executable_arguments);
        apply_context(&mut cmd, options);

        let output = run_process(cmd, executable, self.timeout).await?;
        for line in &output.stderr {
            log.log(ProcessLogLevel::Error, line);
        }

        if !output.status.success() {
            return Err(PreprocessorError::Exit {
                command: executable.to_string(),
                status: output.status,
                stderr: output.stderr.join("; "),
            });
        }
        if !output.stderr.is_empty() {
            return Err(PreprocessorError::Stderr {
                command: executable.to_string(),
                stderr: output.stderr.join("; "),
            });
        }

        single_path(executable, &output.stdout)
    }
}
