mod daemon;

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::clock::SystemClock;
use crate::core::config::{AppSettings, CONFIG_FILE_NAME, DEFAULT_CONFIG_TEMPLATE};
use crate::core::coordinator::{CycleSummary, JobRunner};
use crate::core::credentials::CredentialCipher;
use crate::core::model::{LedgerEntry, Timestamp};
use crate::core::store::Store;
use crate::core::terminal::{self, GuideSection, print_status, print_success, print_warn};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Setup")
        .command("init", "Create the data directory, config file and database")
        .command("encrypt-password <text>", "Encrypt an agent password for storage")
        .print();

    GuideSection::new("Cycles")
        .command("run", "Run one cycle for every connection")
        .command("run --connection <id>", "Run one cycle for a single connection")
        .command("daemon", "Run cycles on the configured cron schedule")
        .print();

    GuideSection::new("Diagnostics")
        .command("status", "Show the last cycle and recently staged files")
        .command("status --agent <id>", "Show every file staged by one agent")
        .print();

    GuideSection::new("Options")
        .command("--config <path>", "Use this config file instead of the data directory's")
        .blank()
        .hint("FILESTAGE_DATA_DIR overrides the data directory.")
        .print();

    println!(
        "\n {} {} [--config <path>] <command>\n",
        style("Usage:").bold(),
        style("filestage").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Init,
    Run { connection: Option<i64> },
    Daemon,
    Status { agent: Option<i64> },
    EncryptPassword(String),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub config: Option<PathBuf>,
    pub command: Command,
}

fn parse_id(flag: &str, value: Option<&String>) -> Result<i64> {
    let value = value.ok_or_else(|| anyhow::anyhow!("{} needs a numeric id", flag))?;
    value
        .parse()
        .with_context(|| format!("{} expects a numeric id, got '{}'", flag, value))
}

/// Parse `args` without the program name.
pub(crate) fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut config = None;
    let mut positional: Vec<&String> = Vec::new();
    let mut connection = None;
    let mut agent = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let path = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                config = Some(PathBuf::from(path));
                i += 2;
            }
            "--connection" => {
                connection = Some(parse_id("--connection", args.get(i + 1))?);
                i += 2;
            }
            "--agent" | "-a" => {
                agent = Some(parse_id("--agent", args.get(i + 1))?);
                i += 2;
            }
            "--help" | "-h" => {
                positional.insert(0, &args[i]);
                i += 1;
            }
            _ => {
                positional.push(&args[i]);
                i += 1;
            }
        }
    }

    let command = match positional.first().map(|s| s.as_str()) {
        None | Some("help") | Some("--help") | Some("-h") => Command::Help,
        Some("init") => Command::Init,
        Some("run") => Command::Run { connection },
        Some("daemon") => Command::Daemon,
        Some("status") => Command::Status { agent },
        Some("encrypt-password") => {
            let plaintext = positional
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("encrypt-password needs the password to encrypt"))?;
            Command::EncryptPassword(plaintext.to_string())
        }
        Some(other) => {
            return Err(anyhow::anyhow!(
                "Unknown command '{}'. Run 'filestage help' for usage.",
                other
            ));
        }
    };

    Ok(CliArgs { config, command })
}

async fn load_settings(args: &CliArgs) -> Result<AppSettings> {
    let data_dir = NativePlatform::data_dir();
    AppSettings::load(args.config.as_deref(), &data_dir).await
}

async fn init_command(args: &CliArgs) -> Result<()> {
    let data_dir = NativePlatform::data_dir();
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Cannot create {}", data_dir.display()))?;
    NativePlatform::restrict_dir_permissions(&data_dir);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    if config_path.exists() {
        print_warn(&format!(
            "Keeping existing config at {}",
            config_path.display()
        ));
    } else {
        tokio::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
            .await
            .with_context(|| format!("Cannot write {}", config_path.display()))?;
        NativePlatform::restrict_file_permissions(&config_path);
    }

    let settings = AppSettings::load(Some(&config_path), &data_dir).await?;
    Store::open(&settings.database_path()).await?;
    for dir in [settings.share_root(), settings.work_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }

    print_success("filestage is ready.");
    GuideSection::new("Locations")
        .status("Config", &config_path.display().to_string())
        .status("Database", &settings.database_path().display().to_string())
        .status("Share", &settings.share_root().display().to_string())
        .status("Work dir", &settings.work_dir().display().to_string())
        .blank()
        .hint("Run 'filestage run' to execute a cycle now, or 'filestage daemon' to schedule them.")
        .print();
    println!();
    Ok(())
}

fn print_cycle_summary(summary: &CycleSummary) {
    GuideSection::new("Cycle Complete")
        .status("Connections", &summary.connections.to_string())
        .status(
            "Generated",
            &format!(
                "{} staged, {} already staged",
                summary.generation.files_staged, summary.generation.files_skipped
            ),
        )
        .status(
            "Transferred",
            &format!(
                "{} staged, {} already staged, {} failed",
                summary.transport.files_staged,
                summary.transport.files_skipped,
                summary.transport.files_failed
            ),
        )
        .status("Failed agents", &summary.agents_failed().to_string())
        .print();
    println!();
}

async fn run_command(settings: &AppSettings, connection: Option<i64>) -> Result<()> {
    let store = Store::open(&settings.database_path()).await?;
    let runner = JobRunner::from_settings(settings, store, Arc::new(SystemClock))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let summary = match connection {
        Some(id) => runner.run_cycle(id, &cancel).await?,
        None => runner.run_all(&cancel).await?,
    };
    if summary.connections_failed > 0 {
        print_warn(&format!(
            "{} connection(s) failed; see the log for details.",
            summary.connections_failed
        ));
    }
    print_cycle_summary(&summary);
    Ok(())
}

fn format_time(at: Option<Timestamp>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S %:z").to_string())
        .unwrap_or_else(|| style("never").dim().to_string())
}

fn describe_entry(entry: &LedgerEntry) -> String {
    let mut actions = Vec::new();
    if entry.status.can_be_retried() {
        actions.push("retryable");
    }
    if entry.status.can_be_canceled() {
        actions.push("cancelable");
    }
    let actions = if actions.is_empty() {
        String::new()
    } else {
        format!(" ({})", actions.join(", "))
    };
    format!(
        "agent {} | {} rows | {}{} | {}",
        entry.agent_id,
        entry.rows,
        entry.status.as_str(),
        actions,
        style(format_time(Some(entry.created_at))).dim()
    )
}

async fn status_command(settings: &AppSettings, agent: Option<i64>) -> Result<()> {
    let store = Store::open(&settings.database_path()).await?;
    let job = store.job_status().await?;

    GuideSection::new("Last Cycle")
        .status("Started", &format_time(job.started))
        .status("Completed", &format_time(job.completed))
        .print();

    let (title, entries) = match agent {
        Some(id) => (format!("Files of Agent {}", id), store.files_for_agent(id).await?),
        None => ("Recent Files".to_string(), store.recent_files(20).await?),
    };
    println!("\n {}", style(title).bold().underlined());
    if entries.is_empty() {
        println!("   {}", style("No files staged yet.").dim());
    }
    for entry in &entries {
        print_status(&entry.file_name, &describe_entry(entry));
    }
    println!();
    Ok(())
}

fn encrypt_password_command(settings: &AppSettings, plaintext: &str) -> Result<()> {
    let cipher = CredentialCipher::new(settings.credentials.encryption_key.as_deref())?;
    if !cipher.is_enabled() {
        return Err(anyhow::anyhow!(
            "No credentials.encryption_key configured; passwords are stored as plaintext."
        ));
    }
    println!("{}", cipher.encrypt(plaintext)?);
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    match &args.command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Init => init_command(&args).await,
        Command::EncryptPassword(plaintext) => {
            let settings = load_settings(&args).await?;
            encrypt_password_command(&settings, plaintext)
        }
        Command::Status { agent } => {
            let settings = load_settings(&args).await?;
            status_command(&settings, *agent).await
        }
        Command::Run { connection } => {
            let settings = load_settings(&args).await?;
            logging::init(&settings.logging.level, settings.log_file().as_deref())?;
            run_command(&settings, *connection).await
        }
        Command::Daemon => {
            let settings = load_settings(&args).await?;
            logging::init(&settings.logging.level, settings.log_file().as_deref())?;
            daemon::run_daemon(&settings).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::FileStatus;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_args(&[]).unwrap().command, Command::Help);
        assert_eq!(parse_args(&args(&["--help"])).unwrap().command, Command::Help);
    }

    #[test]
    fn run_accepts_an_optional_connection() {
        assert_eq!(
            parse_args(&args(&["run"])).unwrap().command,
            Command::Run { connection: None }
        );
        assert_eq!(
            parse_args(&args(&["run", "--connection", "3"])).unwrap().command,
            Command::Run { connection: Some(3) }
        );
        assert!(parse_args(&args(&["run", "--connection", "three"])).is_err());
        assert!(parse_args(&args(&["run", "--connection"])).is_err());
    }

    #[test]
    fn config_flag_is_accepted_anywhere() {
        let parsed = parse_args(&args(&["--config", "/etc/filestage.toml", "status", "-a", "4"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/etc/filestage.toml")));
        assert_eq!(parsed.command, Command::Status { agent: Some(4) });

        let parsed = parse_args(&args(&["daemon", "-c", "local.toml"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("local.toml")));
        assert_eq!(parsed.command, Command::Daemon);
    }

    #[test]
    fn encrypt_password_requires_a_value() {
        assert_eq!(
            parse_args(&args(&["encrypt-password", "hunter2"])).unwrap().command,
            Command::EncryptPassword("hunter2".into())
        );
        assert!(parse_args(&args(&["encrypt-password"])).is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_args(&args(&["gateway"])).is_err());
    }

    #[test]
    fn entry_description_lists_available_actions() {
        let entry = LedgerEntry {
            id: 1,
            agent_id: 7,
            file_name: "roster.csv".into(),
            url: "file:///share/roster.csv".into(),
            rows: 12,
            status: FileStatus::ErrorUploaded,
            created_at: chrono::DateTime::parse_from_rfc3339("2024-06-06T12:00:00+00:00").unwrap(),
        };
        let text = describe_entry(&entry);
        assert!(text.contains("agent 7"));
        assert!(text.contains("ErrorUploaded (retryable, cancelable)"));

        let loaded = LedgerEntry {
            status: FileStatus::Loaded,
            ..entry
        };
        assert!(!describe_entry(&loaded).contains('('));
    }

    #[test]
    fn encrypting_without_a_key_is_refused() {
        let settings = AppSettings::from_toml_str("", std::path::Path::new("/data")).unwrap();
        assert!(encrypt_password_command(&settings, "secret").is_err());
    }
}
