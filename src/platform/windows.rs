use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn shell_inline(content: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("powershell");
        cmd.args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
            .arg(content);
        cmd
    }

    fn restricted_shell_inline(content: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("powershell");
        cmd.args([
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Restricted",
            "-Command",
        ])
        .arg(format!(
            "$ExecutionContext.SessionState.LanguageMode = 'ConstrainedLanguage'; {}",
            content
        ));
        cmd
    }

    fn sandboxed_path() -> String {
        std::env::var("SystemRoot")
            .map(|root| format!("{}\\System32;{}", root, root))
            .unwrap_or_default()
    }

    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("filestage"),
        )
    }
}
