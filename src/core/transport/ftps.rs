use async_trait::async_trait;
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream};
use tracing::debug;

use super::{Endpoint, FileServer, TransportError};

/// FTP with explicit TLS (AUTH TLS). The blocking client runs on the
/// blocking pool.
pub struct FtpsServer {
    connect_timeout: Duration,
    transfer_timeout: Duration,
    allow_test_certificates: bool,
}

struct Target {
    host: String,
    port: u16,
    username: String,
    password: String,
    directory: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    allow_test_certificates: bool,
}

fn map_ftp_error(host: &str, err: FtpError) -> TransportError {
    match err {
        FtpError::ConnectionError(e) => TransportError::network(host, e),
        FtpError::SecureError(reason) => TransportError::Tls {
            host: host.to_string(),
            reason,
        },
        other => TransportError::protocol(host, other),
    }
}

/// A rejected login is an authentication failure unless the session itself
/// broke underneath it.
fn map_login_error(host: &str, user: &str, err: FtpError) -> TransportError {
    match err {
        FtpError::ConnectionError(_) | FtpError::SecureError(_) => map_ftp_error(host, err),
        _ => TransportError::Authentication {
            host: host.to_string(),
            user: user.to_string(),
        },
    }
}

/// Bounds every blocking read and write on the control socket so a silent
/// server releases the blocking-pool thread.
fn bound_socket(socket: &TcpStream, host: &str, timeout: Duration) -> Result<(), TransportError> {
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| TransportError::network(host, e))
}

fn connect(target: &Target) -> Result<NativeTlsFtpStream, TransportError> {
    let host = target.host.as_str();
    let addr = (host, target.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::network(host, e))?
        .next()
        .ok_or_else(|| TransportError::network(host, "host did not resolve"))?;

    let stream = NativeTlsFtpStream::connect_timeout(addr, target.connect_timeout)
        .map_err(|e| map_ftp_error(host, e))?;
    bound_socket(stream.get_ref(), host, target.io_timeout)?;

    let tls = TlsConnector::builder()
        .danger_accept_invalid_certs(target.allow_test_certificates)
        .danger_accept_invalid_hostnames(target.allow_test_certificates)
        .build()
        .map_err(|e| TransportError::Tls {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    let mut stream = stream
        .into_secure(NativeTlsConnector::from(tls), host)
        .map_err(|e| map_ftp_error(host, e))?;

    stream
        .login(target.username.as_str(), target.password.as_str())
        .map_err(|e| map_login_error(host, &target.username, e))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| map_ftp_error(host, e))?;
    Ok(stream)
}

fn list_blocking(target: &Target) -> Result<Vec<String>, TransportError> {
    let host = target.host.as_str();
    let mut stream = connect(target)?;
    let listed = stream.list(Some(target.directory.as_str()));
    let _ = stream.quit();
    let lines = listed.map_err(|e| map_ftp_error(host, e))?;

    let mut names = Vec::new();
    for line in lines {
        match suppaftp::list::File::from_str(&line) {
            Ok(file) if file.is_file() => names.push(file.name().to_string()),
            Ok(_) => {}
            Err(e) => debug!("Unparsed listing line from {}: {:?} ({})", host, line, e),
        }
    }
    Ok(names)
}

fn download_blocking(target: &Target, path: &str) -> Result<Vec<u8>, TransportError> {
    let mut stream = connect(target)?;
    let content = stream.retr_as_buffer(path);
    let _ = stream.quit();
    content
        .map(|cursor| cursor.into_inner())
        .map_err(|e| map_ftp_error(&target.host, e))
}

impl FtpsServer {
    pub fn new(connect_timeout: Duration, transfer_timeout: Duration, allow_test_certificates: bool) -> Self {
        Self {
            connect_timeout,
            transfer_timeout,
            allow_test_certificates,
        }
    }

    fn target(&self, endpoint: &Endpoint) -> Target {
        Target {
            host: endpoint.host.clone(),
            port: endpoint.port,
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            directory: endpoint.directory.clone(),
            connect_timeout: self.connect_timeout,
            io_timeout: self.transfer_timeout,
            allow_test_certificates: self.allow_test_certificates,
        }
    }

    async fn run_blocking<T, F>(&self, host: &str, work: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(self.transfer_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TransportError::protocol(host, join_err)),
            Err(_) => Err(TransportError::Timeout {
                host: host.to_string(),
                timeout: self.transfer_timeout,
            }),
        }
    }
}

#[async_trait]
impl FileServer for FtpsServer {
    async fn list_files(&self, endpoint: &Endpoint) -> Result<Vec<String>, TransportError> {
        let target = self.target(endpoint);
        let names = self
            .run_blocking(&endpoint.host, move || list_blocking(&target))
            .await?;

        let paths: Vec<String> = names
            .into_iter()
            .filter(|name| endpoint.pattern.matches(name))
            .map(|name| endpoint.remote_path(&name))
            .collect();
        debug!(
            "{} file(s) in {}:{} match '{}'",
            paths.len(),
            endpoint.host,
            endpoint.directory,
            endpoint.pattern.as_str()
        );
        Ok(paths)
    }

    async fn download(&self, endpoint: &Endpoint, path: &str) -> Result<Vec<u8>, TransportError> {
        let target = self.target(endpoint);
        let path = path.to_string();
        self.run_blocking(&endpoint.host, move || download_blocking(&target, &path))
            .await
    }
}
