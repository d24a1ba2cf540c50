mod ftps;
mod glob;
mod sftp;
mod transporter;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::TransportConfig;
use crate::core::credentials::CredentialCipher;
use crate::core::error::AgentError;
use crate::core::model::{Agent, AgentKind};

pub use ftps::FtpsServer;
pub use glob::FilePattern;
pub use sftp::SftpServer;
pub use transporter::{FileTransporter, TransportSummary};

/// Remote file server failures. Every variant names the host it concerns.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication failed for {user}@{host}")]
    Authentication { host: String, user: String },

    #[error("network error talking to {host}: {reason}")]
    Network { host: String, reason: String },

    #[error("timed out after {timeout:?} talking to {host}")]
    Timeout { host: String, timeout: Duration },

    #[error("TLS negotiation with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("protocol error from {host}: {reason}")]
    Protocol { host: String, reason: String },
}

impl TransportError {
    pub fn network(host: &str, reason: impl ToString) -> Self {
        TransportError::Network {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(host: &str, reason: impl ToString) -> Self {
        TransportError::Protocol {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Authentication { .. } => "authentication",
            TransportError::Network { .. } => "network",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Tls { .. } => "tls",
            TransportError::Protocol { .. } => "protocol",
        }
    }

    pub fn host(&self) -> &str {
        match self {
            TransportError::Authentication { host, .. }
            | TransportError::Network { host, .. }
            | TransportError::Timeout { host, .. }
            | TransportError::Tls { host, .. }
            | TransportError::Protocol { host, .. } => host,
        }
    }
}

/// Connection details for one transport agent, with the password decrypted.
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub directory: String,
    pub pattern: FilePattern,
}

impl Endpoint {
    pub fn for_agent(agent: &Agent, cipher: &CredentialCipher) -> Result<Self, AgentError> {
        let host = agent
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AgentError::configuration(&agent.name, "no host configured"))?;
        let username = agent
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AgentError::configuration(&agent.name, "no username configured"))?;
        let stored_password = agent
            .password
            .as_deref()
            .ok_or_else(|| AgentError::configuration(&agent.name, "no password configured"))?;
        let password = cipher.decrypt(stored_password).map_err(|e| {
            AgentError::configuration(&agent.name, format!("password could not be decrypted: {}", e))
        })?;
        let port = match agent.port {
            Some(port) => u16::try_from(port).ok().filter(|p| *p != 0).ok_or_else(|| {
                AgentError::configuration(&agent.name, format!("port {} is out of range", port))
            })?,
            None => agent.kind.default_port().ok_or_else(|| {
                AgentError::configuration(
                    &agent.name,
                    format!("{} agents have no default port", agent.kind.as_str()),
                )
            })?,
        };
        let pattern_text = agent
            .file_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("*");
        let pattern = FilePattern::new(pattern_text).map_err(|e| {
            AgentError::configuration(&agent.name, format!("invalid file pattern: {}", e))
        })?;

        Ok(Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password,
            directory: agent
                .directory
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ".".to_string()),
            pattern,
        })
    }

    /// Remote path of a file inside the configured directory.
    pub fn remote_path(&self, file_name: &str) -> String {
        if self.directory.ends_with('/') {
            format!("{}{}", self.directory, file_name)
        } else {
            format!("{}/{}", self.directory, file_name)
        }
    }
}

/// A remote file server protocol.
#[async_trait]
pub trait FileServer: Send + Sync {
    /// Paths of the regular files in the endpoint's directory whose names
    /// match its pattern.
    async fn list_files(&self, endpoint: &Endpoint) -> Result<Vec<String>, TransportError>;

    async fn download(&self, endpoint: &Endpoint, path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Closed mapping from agent kind to protocol client.
#[derive(Clone)]
pub struct FileServers {
    sftp: Arc<dyn FileServer>,
    ftps: Arc<dyn FileServer>,
}

impl FileServers {
    pub fn new(sftp: Arc<dyn FileServer>, ftps: Arc<dyn FileServer>) -> Self {
        Self { sftp, ftps }
    }

    pub fn from_settings(settings: &TransportConfig) -> Self {
        let connect_timeout = Duration::from_secs(settings.connect_timeout_secs);
        let transfer_timeout = Duration::from_secs(settings.transfer_timeout_secs);
        Self::new(
            Arc::new(SftpServer::new(connect_timeout, transfer_timeout)),
            Arc::new(FtpsServer::new(
                connect_timeout,
                transfer_timeout,
                settings.allow_test_certificates,
            )),
        )
    }

    pub fn for_kind(&self, kind: AgentKind) -> Option<&dyn FileServer> {
        match kind {
            AgentKind::Sftp => Some(self.sftp.as_ref()),
            AgentKind::Ftps => Some(self.ftps.as_ref()),
            AgentKind::Manual | AgentKind::Script => None,
        }
    }
}

/// Everything after the last `/`.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Trigger;

    fn agent(kind: AgentKind) -> Agent {
        Agent {
            id: 1,
            connection_id: 1,
            name: "district-sis".into(),
            kind,
            enabled: true,
            archived: false,
            run_order: None,
            last_executed: None,
            host: Some(" sftp.example.org ".into()),
            port: None,
            username: Some("loader".into()),
            password: Some("secret".into()),
            directory: Some("/outbox/".into()),
            file_pattern: None,
            script: None,
            script_error: None,
            triggers: vec![Trigger::new(1, 6, 0)],
        }
    }

    #[test]
    fn endpoint_applies_kind_default_port_and_pattern() {
        let cipher = CredentialCipher::plaintext();
        let sftp = Endpoint::for_agent(&agent(AgentKind::Sftp), &cipher).unwrap();
        assert_eq!(sftp.host, "sftp.example.org");
        assert_eq!(sftp.port, 22);
        assert_eq!(sftp.pattern.as_str(), "*");
        assert_eq!(sftp.remote_path("a.csv"), "/outbox/a.csv");

        let ftps = Endpoint::for_agent(&agent(AgentKind::Ftps), &cipher).unwrap();
        assert_eq!(ftps.port, 990);

        let mut explicit = agent(AgentKind::Ftps);
        explicit.port = Some(2121);
        explicit.directory = Some("in".into());
        let endpoint = Endpoint::for_agent(&explicit, &cipher).unwrap();
        assert_eq!(endpoint.port, 2121);
        assert_eq!(endpoint.remote_path("a.csv"), "in/a.csv");
    }

    #[test]
    fn endpoint_decrypts_stored_password() {
        let cipher = CredentialCipher::new(Some("key")).unwrap();
        let mut encrypted = agent(AgentKind::Sftp);
        encrypted.password = Some(cipher.encrypt("hunter2").unwrap());
        let endpoint = Endpoint::for_agent(&encrypted, &cipher).unwrap();
        assert_eq!(endpoint.password, "hunter2");

        let mut garbage = agent(AgentKind::Sftp);
        garbage.password = Some("not encrypted".into());
        let err = Endpoint::for_agent(&garbage, &cipher).err().unwrap();
        assert!(matches!(err, AgentError::Configuration { .. }));
    }

    #[test]
    fn missing_host_or_credentials_is_a_configuration_error() {
        let cipher = CredentialCipher::plaintext();
        let mut no_host = agent(AgentKind::Sftp);
        no_host.host = Some("  ".into());
        assert!(matches!(
            Endpoint::for_agent(&no_host, &cipher),
            Err(AgentError::Configuration { .. })
        ));

        let mut no_password = agent(AgentKind::Sftp);
        no_password.password = None;
        assert!(matches!(
            Endpoint::for_agent(&no_password, &cipher),
            Err(AgentError::Configuration { .. })
        ));
    }

    #[test]
    fn out_of_range_port_is_a_configuration_error() {
        let cipher = CredentialCipher::plaintext();
        for port in [70000, 0, -1] {
            let mut bad = agent(AgentKind::Sftp);
            bad.port = Some(port);
            match Endpoint::for_agent(&bad, &cipher) {
                Err(AgentError::Configuration { agent, reason }) => {
                    assert_eq!(agent, "district-sis");
                    assert!(reason.contains("port"), "{}", reason);
                    assert!(reason.contains(&port.to_string()), "{}", reason);
                }
                _ => panic!("port {} should be rejected", port),
            }
        }
    }

    #[test]
    fn base_name_takes_text_after_last_slash() {
        assert_eq!(base_name("/outbox/2024/students.csv"), "students.csv");
        assert_eq!(base_name("students.csv"), "students.csv");
        assert_eq!(base_name("dir/"), "");
    }

    #[test]
    fn errors_carry_host_and_category() {
        let err = TransportError::Authentication {
            host: "h".into(),
            user: "u".into(),
        };
        assert_eq!(err.host(), "h");
        assert_eq!(err.category(), "authentication");
        assert_eq!(TransportError::network("n", "reset").category(), "network");
    }
}
