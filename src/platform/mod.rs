use std::path::PathBuf;

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Build a **tokio** `Command` that interprets inline script content with
    /// the platform shell and no restrictions.
    fn shell_inline(content: &str) -> tokio::process::Command;

    /// Build a **tokio** `Command` that interprets inline script content in
    /// the platform's constrained shell mode.
    fn restricted_shell_inline(content: &str) -> tokio::process::Command;

    /// Default `PATH` value for sandboxed script execution.
    fn sandboxed_path() -> String;

    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &std::path::Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &std::path::Path);

    /// Root data directory for filestage.
    /// Unix: `~/.filestage`, Windows: `%APPDATA%\filestage`.
    fn data_dir() -> PathBuf;
}

/// `FILESTAGE_DATA_DIR` overrides the platform default.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var_os("FILESTAGE_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
