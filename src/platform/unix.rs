use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn shell_inline(content: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("--noprofile").arg("--norc").arg("-c").arg(content);
        cmd
    }

    fn restricted_shell_inline(content: &str) -> tokio::process::Command {
        // Restricted bash: no cd, no PATH/SHELL/ENV changes, no `/` in
        // command names, no output redirection.
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("--restricted")
            .arg("--noprofile")
            .arg("--norc")
            .arg("-c")
            .arg(content);
        cmd
    }

    fn sandboxed_path() -> String {
        "/usr/local/bin:/usr/bin:/bin".to_string()
    }

    fn restrict_dir_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }

    fn restrict_file_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".filestage"),
        )
    }
}
