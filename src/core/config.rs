use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "filestage.toml";

/// Written by `filestage init`. Every key shows its default.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# filestage configuration

[database]
# path = "filestage.db"

[storage]
mode = "local"
# share_name = "share"

[transport]
allow_test_certificates = false
connect_timeout_secs = 30
transfer_timeout_secs = 300

[preprocessors]
allow_unrestricted_scripts = false
external_enabled = true
timeout_secs = 300
# work_dir = "work"

[credentials]
# encryption_key = ""

[daemon]
cron = "0 */5 * * * *"

[logging]
level = "info"
# file = "filestage.log"
"#;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub preprocessors: PreprocessorConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory relative paths and defaults resolve against.
    #[serde(skip)]
    data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// Local filesystem or mounted network share.
    #[default]
    Local,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: FileMode,

    /// Root of the staging share. Files land under `<share>/DataImport/Agent-<id>/`.
    #[serde(default)]
    pub share_name: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Accept FTPS certificates that fail validation. Never enable in production.
    #[serde(default)]
    pub allow_test_certificates: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessorConfig {
    /// Ceiling on script trust: when false every inline script runs sandboxed.
    #[serde(default)]
    pub allow_unrestricted_scripts: bool,

    #[serde(default = "default_true")]
    pub external_enabled: bool,

    #[serde(default = "default_preprocessor_timeout")]
    pub timeout_secs: u64,

    /// Scratch directory scripts run in.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Six-field cron expression (with seconds) for the cycle trigger.
    #[serde(default = "default_cron")]
    pub cron: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_connect_timeout() -> u64 {
    30
}
fn default_transfer_timeout() -> u64 {
    300
}
fn default_preprocessor_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_cron() -> String {
    "0 */5 * * * *".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            allow_test_certificates: false,
            connect_timeout_secs: default_connect_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            allow_unrestricted_scripts: false,
            external_enabled: true,
            timeout_secs: default_preprocessor_timeout(),
            work_dir: None,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl AppSettings {
    /// Load settings from `config_path`, or `<data_dir>/filestage.toml` when
    /// no path is given. A missing default file yields defaults; a missing
    /// explicit file is an error.
    pub async fn load(config_path: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let path = match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow::anyhow!("Config file not found: {:?}", path));
                }
                path.to_path_buf()
            }
            None => data_dir.join(CONFIG_FILE_NAME),
        };

        if !path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE_NAME);
            return Ok(Self::with_data_dir(Self::default(), data_dir));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let settings = Self::from_toml_str(&content, data_dir)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn from_toml_str(content: &str, data_dir: &Path) -> Result<Self> {
        let settings: AppSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(Self::with_data_dir(settings, data_dir))
    }

    fn with_data_dir(mut settings: Self, data_dir: &Path) -> Self {
        settings.data_dir = data_dir.to_path_buf();
        settings
    }

    fn validate(&self) -> Result<()> {
        if self.preprocessors.timeout_secs == 0 {
            return Err(anyhow::anyhow!("preprocessors.timeout_secs must be positive"));
        }
        if self.transport.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!("transport.connect_timeout_secs must be positive"));
        }
        if self.transport.transfer_timeout_secs == 0 {
            return Err(anyhow::anyhow!("transport.transfer_timeout_secs must be positive"));
        }
        Ok(())
    }

    fn resolve(&self, path: &Option<PathBuf>, default: &str) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join(default),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database.path, "filestage.db")
    }

    pub fn share_root(&self) -> PathBuf {
        self.resolve(&self.storage.share_name, "share")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve(&self.preprocessors.work_dir, "work")
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.logging
            .file
            .as_ref()
            .map(|_| self.resolve(&self.logging.file, "filestage.log"))
    }
}
