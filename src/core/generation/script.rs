use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use super::{
    Preprocessor, PreprocessorError, ProcessLog, ProcessLogLevel, ProcessOptions, apply_context,
    run_process, single_path,
};
use crate::core::model::Script;
use crate::platform::{NativePlatform, Platform};

/// Variables a sandboxed script keeps after the environment is cleared.
const SANDBOX_ENV_PASSTHROUGH: &[&str] = &["LANG", "SystemRoot", "WINDIR"];

/// Interprets inline script content with the platform shell.
///
/// The script prints the path of the file it generated as its only stdout
/// line. Each stderr line is a log record; a `VERBOSE:`, `DEBUG:`, `INFO:`,
/// `WARNING:` or `ERROR:` prefix sets its severity and unprefixed lines
/// count as errors. Any error record fails the run.
pub struct InlineScriptPreprocessor {
    work_dir: PathBuf,
    timeout: Duration,
}

impl InlineScriptPreprocessor {
    pub fn new(work_dir: PathBuf, timeout: Duration) -> Self {
        Self { work_dir, timeout }
    }
}

fn parse_record(line: &str) -> (ProcessLogLevel, &str) {
    const PREFIXES: [(&str, ProcessLogLevel); 5] = [
        ("VERBOSE:", ProcessLogLevel::Trace),
        ("DEBUG:", ProcessLogLevel::Debug),
        ("INFO:", ProcessLogLevel::Information),
        ("WARNING:", ProcessLogLevel::Warning),
        ("ERROR:", ProcessLogLevel::Error),
    ];
    for (prefix, level) in PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            return (level, rest.trim());
        }
    }
    (ProcessLogLevel::Error, line)
}

#[async_trait]
impl Preprocessor for InlineScriptPreprocessor {
    async fn generate(
        &self,
        script: &Script,
        options: &ProcessOptions,
        log: &dyn ProcessLog,
    ) -> Result<PathBuf, PreprocessorError> {
        let content = script
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PreprocessorError::Incomplete {
                script: script.name.clone(),
                missing: "script content",
            })?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| PreprocessorError::WorkDir {
                path: self.work_dir.clone(),
                source,
            })?;
        NativePlatform::restrict_dir_permissions(&self.work_dir);

        let mut cmd = if options.sandboxed {
            let mut cmd = NativePlatform::restricted_shell_inline(content);
            cmd.env_clear();
            for key in SANDBOX_ENV_PASSTHROUGH {
                if let Some(value) = std::env::var_os(key) {
                    cmd.env(key, value);
                }
            }
            cmd.env("PATH", NativePlatform::sandboxed_path());
            cmd
        } else {
            NativePlatform::shell_inline(content)
        };
        cmd.current_dir(&self.work_dir);
        apply_context(&mut cmd, options);

        let output = run_process(cmd, &script.name, self.timeout).await?;

        let mut errors = Vec::new();
        for line in &output.stderr {
            let (level, message) = parse_record(line);
            log.log(level, message);
            if level == ProcessLogLevel::Error {
                errors.push(message.to_string());
            }
        }
        if !errors.is_empty() {
            return Err(PreprocessorError::ScriptErrors {
                command: script.name.clone(),
                messages: errors.join("; "),
            });
        }
        if !output.status.success() {
            return Err(PreprocessorError::Exit {
                command: script.name.clone(),
                status: output.status,
                stderr: "no error records".to_string(),
            });
        }

        let path = single_path(&script.name, &output.stdout)?;
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.work_dir.join(path))
        }
    }
}
