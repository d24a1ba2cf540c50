//! Records the core reads from (and writes back to) the store.
//!
//! Connections, agents, triggers and scripts are owned by the administrative
//! layer; the core only consumes them. Ledger entries and job status are the
//! core's own output.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<FixedOffset>;

/// How an agent obtains its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Placeholder for files uploaded by hand; never scheduled.
    Manual,
    Sftp,
    Ftps,
    /// Runs a file-generator script.
    Script,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Manual => "Manual",
            AgentKind::Sftp => "SFTP",
            AgentKind::Ftps => "FTPS",
            AgentKind::Script => "Script",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Manual" => Some(AgentKind::Manual),
            "SFTP" => Some(AgentKind::Sftp),
            "FTPS" => Some(AgentKind::Ftps),
            "Script" => Some(AgentKind::Script),
            _ => None,
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            AgentKind::Sftp => Some(22),
            AgentKind::Ftps => Some(990),
            AgentKind::Manual | AgentKind::Script => None,
        }
    }
}

/// A weekly recurrence point. `day` follows 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Trigger {
    pub fn new(day: u8, hour: u8, minute: u8) -> Self {
        Self { day, hour, minute }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    InlineGenerator,
    ExternalGenerator,
    InlineProcessor,
    ExternalProcessor,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::InlineGenerator => "inline_generator",
            ScriptKind::ExternalGenerator => "external_generator",
            ScriptKind::InlineProcessor => "inline_processor",
            ScriptKind::ExternalProcessor => "external_processor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline_generator" => Some(ScriptKind::InlineGenerator),
            "external_generator" => Some(ScriptKind::ExternalGenerator),
            "inline_processor" => Some(ScriptKind::InlineProcessor),
            "external_processor" => Some(ScriptKind::ExternalProcessor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub id: i64,
    pub name: String,
    pub kind: ScriptKind,
    pub content: Option<String>,
    pub executable_path: Option<String>,
    pub executable_arguments: Vec<String>,
    /// Script talks to the downstream API and needs the connection settings.
    pub requires_connection: bool,
    /// Declared trust level. Untrusted scripts always run sandboxed.
    pub unrestricted: bool,
}

/// The downstream system a group of agents works on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: i64,
    pub connection_id: i64,
    pub name: String,
    pub kind: AgentKind,
    pub enabled: bool,
    pub archived: bool,
    pub run_order: Option<i64>,
    pub last_executed: Option<Timestamp>,
    pub host: Option<String>,
    /// As stored; range-checked when the endpoint is built.
    pub port: Option<i64>,
    pub username: Option<String>,
    /// Stored form of the password; see `CredentialCipher`.
    pub password: Option<String>,
    pub directory: Option<String>,
    pub file_pattern: Option<String>,
    pub script: Option<Script>,
    /// Why the assigned script row could not be read, if it couldn't.
    pub script_error: Option<String>,
    pub triggers: Vec<Trigger>,
}

impl Agent {
    /// Storage directory for this agent, relative to the share root.
    pub fn directory_name(&self) -> String {
        format!("Agent-{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    ErrorLoading,
    ErrorTransform,
    ErrorUploaded,
    Loaded,
    Loading,
    Transforming,
    Uploaded,
    Retry,
    /// Legacy status for files removed from storage.
    Deleted,
    Canceled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::ErrorLoading => "ErrorLoading",
            FileStatus::ErrorTransform => "ErrorTransform",
            FileStatus::ErrorUploaded => "ErrorUploaded",
            FileStatus::Loaded => "Loaded",
            FileStatus::Loading => "Loading",
            FileStatus::Transforming => "Transforming",
            FileStatus::Uploaded => "Uploaded",
            FileStatus::Retry => "Retry",
            FileStatus::Deleted => "Deleted",
            FileStatus::Canceled => "Canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ErrorLoading" => Some(FileStatus::ErrorLoading),
            "ErrorTransform" => Some(FileStatus::ErrorTransform),
            "ErrorUploaded" => Some(FileStatus::ErrorUploaded),
            "Loaded" => Some(FileStatus::Loaded),
            "Loading" => Some(FileStatus::Loading),
            "Transforming" => Some(FileStatus::Transforming),
            "Uploaded" => Some(FileStatus::Uploaded),
            "Retry" => Some(FileStatus::Retry),
            "Deleted" => Some(FileStatus::Deleted),
            "Canceled" => Some(FileStatus::Canceled),
            _ => None,
        }
    }

    /// Problem files can be retried; pending, running and finished work cannot.
    pub fn can_be_retried(&self) -> bool {
        matches!(
            self,
            FileStatus::ErrorLoading | FileStatus::ErrorTransform | FileStatus::ErrorUploaded
        )
    }

    pub fn can_be_canceled(&self) -> bool {
        matches!(
            self,
            FileStatus::ErrorLoading
                | FileStatus::ErrorTransform
                | FileStatus::ErrorUploaded
                | FileStatus::Uploaded
                | FileStatus::Retry
        )
    }
}

/// One staged file in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub agent_id: i64,
    pub file_name: String,
    pub url: String,
    pub rows: i64,
    pub status: FileStatus,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub started: Option<Timestamp>,
    pub completed: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_kind_round_trips_through_storage_names() {
        for kind in [
            AgentKind::Manual,
            AgentKind::Sftp,
            AgentKind::Ftps,
            AgentKind::Script,
        ] {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AgentKind::parse("PowerShell"), None);
    }

    #[test]
    fn default_ports_exist_only_for_transport_kinds() {
        assert_eq!(AgentKind::Sftp.default_port(), Some(22));
        assert_eq!(AgentKind::Ftps.default_port(), Some(990));
        assert_eq!(AgentKind::Script.default_port(), None);
        assert_eq!(AgentKind::Manual.default_port(), None);
    }

    #[test]
    fn only_error_statuses_can_be_retried() {
        assert!(FileStatus::ErrorUploaded.can_be_retried());
        assert!(FileStatus::ErrorLoading.can_be_retried());
        assert!(!FileStatus::Uploaded.can_be_retried());
        assert!(!FileStatus::Loaded.can_be_retried());
        assert!(!FileStatus::Deleted.can_be_retried());
    }

    #[test]
    fn pending_work_can_be_canceled_but_finished_work_cannot() {
        assert!(FileStatus::Uploaded.can_be_canceled());
        assert!(FileStatus::Retry.can_be_canceled());
        assert!(!FileStatus::Loading.can_be_canceled());
        assert!(!FileStatus::Canceled.can_be_canceled());
    }
}
