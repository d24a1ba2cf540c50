use async_trait::async_trait;
use russh::client;
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Endpoint, FileServer, TransportError};

struct SftpHandler;

#[async_trait]
impl client::Handler for SftpHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned per agent.
        Ok(true)
    }
}

struct Session {
    handle: client::Handle<SftpHandler>,
    sftp: SftpSession,
}

impl Session {
    async fn close(self) {
        let _ = self.sftp.close().await;
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}

/// `None` when the connect deadline passed first.
fn connect_outcome<T>(
    host: &str,
    timeout: Duration,
    attempt: Option<Result<T, russh::Error>>,
) -> Result<T, TransportError> {
    match attempt {
        Some(Ok(handle)) => Ok(handle),
        Some(Err(e)) => Err(TransportError::network(host, e)),
        None => Err(TransportError::Timeout {
            host: host.to_string(),
            timeout,
        }),
    }
}

fn authentication_outcome(
    host: &str,
    user: &str,
    attempt: Result<bool, russh::Error>,
) -> Result<(), TransportError> {
    match attempt {
        Ok(true) => Ok(()),
        Ok(false) => Err(TransportError::Authentication {
            host: host.to_string(),
            user: user.to_string(),
        }),
        Err(e) => Err(TransportError::network(host, e)),
    }
}

/// SFTP over an SSH session authenticated by password.
pub struct SftpServer {
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

impl SftpServer {
    pub fn new(connect_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            transfer_timeout,
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Session, TransportError> {
        let host = endpoint.host.as_str();
        debug!("Opening SFTP session to {}:{} as {}", host, endpoint.port, endpoint.username);

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.transfer_timeout),
            ..Default::default()
        });

        let attempt = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, (host, endpoint.port), SftpHandler),
        )
        .await
        .ok();
        let mut handle = connect_outcome(host, self.connect_timeout, attempt)?;

        let authenticated = handle
            .authenticate_password(endpoint.username.as_str(), endpoint.password.as_str())
            .await;
        authentication_outcome(host, &endpoint.username, authenticated)?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::protocol(host, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransportError::protocol(host, e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::protocol(host, e))?;

        Ok(Session { handle, sftp })
    }

    async fn bounded<T, F>(&self, host: &str, work: F) -> Result<T, TransportError>
    where
        F: std::future::Future<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.transfer_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                host: host.to_string(),
                timeout: self.transfer_timeout,
            }),
        }
    }
}

#[async_trait]
impl FileServer for SftpServer {
    async fn list_files(&self, endpoint: &Endpoint) -> Result<Vec<String>, TransportError> {
        let host = endpoint.host.as_str();
        let session = self.open(endpoint).await?;

        let listed = self
            .bounded(host, async {
                session
                    .sftp
                    .read_dir(endpoint.directory.as_str())
                    .await
                    .map_err(|e| TransportError::protocol(host, e))
            })
            .await;
        session.close().await;

        let mut paths = Vec::new();
        for entry in listed? {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name();
            if endpoint.pattern.matches(&name) {
                paths.push(endpoint.remote_path(&name));
            }
        }
        debug!(
            "{} file(s) in {}:{} match '{}'",
            paths.len(),
            host,
            endpoint.directory,
            endpoint.pattern.as_str()
        );
        Ok(paths)
    }

    async fn download(&self, endpoint: &Endpoint, path: &str) -> Result<Vec<u8>, TransportError> {
        let host = endpoint.host.as_str();
        let session = self.open(endpoint).await?;

        let content = self
            .bounded(host, async {
                session
                    .sftp
                    .read(path)
                    .await
                    .map_err(|e| TransportError::protocol(host, e))
            })
            .await;
        session.close().await;
        content
    }
}
