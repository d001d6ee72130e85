use std::io::{self, BufReader, Cursor};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::rustls::{ClientConfig, RootCertStore};
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream, Status};
use tracing::debug;

use crate::config::{EndpointConfig, Timeouts, TransportKind};
use crate::domains::mailbox;
use crate::error::{DropBridgeError, Result, TransportError};
use crate::interfaces::transport::{file_matcher, FileTransport, TransportResult};

pub fn build_transport(endpoint: &EndpointConfig) -> Result<Arc<dyn FileTransport>> {
    match endpoint.kind() {
        TransportKind::Ftps => Ok(Arc::new(FtpsTransport::from_config(endpoint)?)),
        TransportKind::Local => {
            let root = endpoint.root.as_deref().ok_or_else(|| {
                DropBridgeError::Config("local transport requires \"root\"".to_string())
            })?;
            Ok(Arc::new(LocalTransport::new(root).with_timeouts(endpoint.timeouts())))
        }
    }
}

struct FtpsSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
    server_name: String,
    root: Option<String>,
    timeouts: Timeouts,
    tls: Arc<ClientConfig>,
}

/// Explicit FTPS (AUTH TLS, PROT P) endpoint. Each operation logs in, does its
/// work and quits on a blocking thread.
pub struct FtpsTransport {
    name: String,
    settings: Arc<FtpsSettings>,
}

impl FtpsTransport {
    pub fn from_config(endpoint: &EndpointConfig) -> Result<Self> {
        let host = endpoint
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| DropBridgeError::Config("ftps endpoint requires \"host\"".to_string()))?;
        let username = endpoint.username.clone().ok_or_else(|| {
            DropBridgeError::Config("ftps endpoint requires \"username\"".to_string())
        })?;
        let server_name = endpoint
            .tls_server_name
            .clone()
            .unwrap_or_else(|| host.clone());
        let tls = tls_config(endpoint.ca_cert_path.as_deref())?;
        let port = endpoint.port();
        Ok(Self {
            name: format!("ftps://{host}:{port}"),
            settings: Arc::new(FtpsSettings {
                host,
                port,
                username,
                password: endpoint.password.clone().unwrap_or_default(),
                server_name,
                root: endpoint.root.clone(),
                timeouts: endpoint.timeouts(),
                tls,
            }),
        })
    }

    async fn with_session<T, F>(&self, op: &'static str, f: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RustlsFtpStream, &FtpsSettings) -> TransportResult<T> + Send + 'static,
    {
        let settings = self.settings.clone();
        let deadline = settings.session_deadline();
        blocking_within(op, deadline, move || {
            let mut session = settings.open_session()?;
            let result = f(&mut session, &settings);
            if let Err(err) = session.quit() {
                debug!(op, error = %err, "ftps quit failed");
            }
            result
        })
        .await
    }
}

/// Runs blocking transport work on the blocking pool and gives up waiting
/// after `deadline`. The thread itself ends when its socket timeouts fire.
async fn blocking_within<T, F>(op: &'static str, deadline: Duration, f: F) -> TransportResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TransportResult<T> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(TransportError::Network(format!("{op} aborted: {err}"))),
        Err(_) => Err(TransportError::Network(format!(
            "{op} did not finish within {}ms",
            deadline.as_millis()
        ))),
    }
}

impl FtpsSettings {
    fn open_session(&self) -> TransportResult<RustlsFtpStream> {
        let addr = resolve(&self.host, self.port)?;
        // Timeouts go on before the greeting is read.
        let control = connect_socket(&addr, &self.timeouts)
            .map_err(|e| TransportError::Network(format!("connect {addr}: {e}")))?;
        let stream = RustlsFtpStream::connect_with_stream(control)
            .map_err(|e| TransportError::Network(format!("greeting from {addr}: {e}")))?;
        let timeouts = self.timeouts;
        let stream = stream.passive_stream_builder(move |data_addr: SocketAddr| {
            connect_socket(&data_addr, &timeouts).map_err(FtpError::ConnectionError)
        });
        let mut stream = stream
            .into_secure(RustlsConnector::from(self.tls.clone()), &self.server_name)
            .map_err(|e| TransportError::Network(format!("tls upgrade: {e}")))?;
        stream
            .login(self.username.as_str(), self.password.as_str())
            .map_err(|e| map_login_error(e, &self.username))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(stream)
    }

    /// Upper bound on one whole session: connect, one transfer each way and
    /// the control-channel round trips around them.
    fn session_deadline(&self) -> Duration {
        self.timeouts.connect * 2 + self.timeouts.read + self.timeouts.write
    }

    fn remote_path(&self, path: &str) -> String {
        match &self.root {
            Some(root) if !path.starts_with('/') => mailbox::join(root, path),
            _ => path.to_string(),
        }
    }
}

fn resolve(host: &str, port: u16) -> TransportResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Network(format!("resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Network(format!("no address for {host}")))
}

fn tls_config(ca_cert_path: Option<&str>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = ca_cert_path {
        let file = std::fs::File::open(path)
            .map_err(|e| DropBridgeError::Config(format!("ca_cert_path {path}: {e}")))?;
        let mut reader = BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| DropBridgeError::Config(format!("{path}: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| DropBridgeError::Config(format!("{path}: {e}")))?;
        }
    }
    Ok(Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

/// Control and passive data sockets share the endpoint's timeouts.
fn connect_socket(addr: &SocketAddr, timeouts: &Timeouts) -> io::Result<TcpStream> {
    let socket = TcpStream::connect_timeout(addr, timeouts.connect)?;
    socket.set_read_timeout(Some(timeouts.read))?;
    socket.set_write_timeout(Some(timeouts.write))?;
    Ok(socket)
}

fn map_login_error(err: FtpError, username: &str) -> TransportError {
    match err {
        FtpError::UnexpectedResponse(_) => {
            TransportError::Auth(format!("login rejected for {username}"))
        }
        other => TransportError::Network(other.to_string()),
    }
}

/// A 550 from RNFR/RNTO only means "already claimed" when the source is gone.
/// If it is still there the target side refused, e.g. an unwritable
/// `claimed/` directory.
fn rename_failure(err: TransportError, from: &str, to: &str, source_exists: bool) -> TransportError {
    match err {
        TransportError::NotFound(_) if source_exists => TransportError::Network(format!(
            "rename {from} -> {to} refused while {from} still exists"
        )),
        other => other,
    }
}

fn map_ftp_error(err: FtpError, path: &str) -> TransportError {
    match err {
        FtpError::UnexpectedResponse(response) => match response.status {
            Status::FileUnavailable => TransportError::NotFound(path.to_string()),
            Status::NotLoggedIn => TransportError::Auth(format!("not logged in: {path}")),
            status => TransportError::Network(format!("{path}: unexpected reply {status:?}")),
        },
        other => TransportError::Network(format!("{path}: {other}")),
    }
}

fn parent_dir(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx]).filter(|p| !p.is_empty())
}

#[async_trait]
impl FileTransport for FtpsTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let path = path.to_string();
        self.with_session("put", move |ftp, settings| {
            let remote = settings.remote_path(&path);
            if let Some(parent) = parent_dir(&remote) {
                // Fails when the directory already exists.
                let _ = ftp.mkdir(parent);
            }
            ftp.put_file(remote.as_str(), &mut Cursor::new(bytes))
                .map(|_| ())
                .map_err(|e| map_ftp_error(e, &remote))
        })
        .await
    }

    async fn get(&self, path: &str) -> TransportResult<Vec<u8>> {
        let path = path.to_string();
        self.with_session("get", move |ftp, settings| {
            let remote = settings.remote_path(&path);
            ftp.retr_as_buffer(remote.as_str())
                .map(Cursor::into_inner)
                .map_err(|e| map_ftp_error(e, &remote))
        })
        .await
    }

    async fn list(&self, dir: &str, pattern: &str) -> TransportResult<Vec<String>> {
        let matcher = file_matcher(pattern)?;
        let dir = dir.to_string();
        self.with_session("list", move |ftp, settings| {
            let remote = settings.remote_path(&dir);
            let entries = match ftp.nlst(Some(remote.as_str())) {
                Ok(entries) => entries,
                // Several servers answer 550 for an empty directory.
                Err(e) => match map_ftp_error(e, &remote) {
                    TransportError::NotFound(_) => Vec::new(),
                    other => return Err(other),
                },
            };
            Ok(entries
                .iter()
                .filter_map(|entry| entry.rsplit('/').next())
                .filter(|name| matcher.is_match(name))
                .map(str::to_string)
                .collect())
        })
        .await
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        let path = path.to_string();
        self.with_session("delete", move |ftp, settings| {
            let remote = settings.remote_path(&path);
            ftp.rm(remote.as_str()).map_err(|e| map_ftp_error(e, &remote))
        })
        .await
    }

    async fn rename(&self, from: &str, to: &str) -> TransportResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.with_session("rename", move |ftp, settings| {
            let (from, to) = (settings.remote_path(&from), settings.remote_path(&to));
            if let Some(parent) = parent_dir(&to) {
                // Usually fails because the directory already exists.
                if let Err(err) = ftp.mkdir(parent) {
                    debug!(dir = parent, error = %err, "ftps mkdir skipped");
                }
            }
            match ftp.rename(from.as_str(), to.as_str()) {
                Ok(()) => Ok(()),
                Err(err) => {
                    let err = map_ftp_error(err, &from);
                    let source_exists = err.is_not_found() && ftp.size(from.as_str()).is_ok();
                    Err(rename_failure(err, &from, &to, source_exists))
                }
            }
        })
        .await
    }

    fn supports_rename(&self) -> bool {
        true
    }
}

/// A directory tree on a mounted share. Renames are atomic on POSIX
/// filesystems, so the rename claim holds across processes.
pub struct LocalTransport {
    name: String,
    root: PathBuf,
    timeouts: Timeouts,
}

impl LocalTransport {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            name: format!("local://{}", root.display()),
            root,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn map_io_error(err: io::Error, path: &str) -> TransportError {
    match err.kind() {
        io::ErrorKind::NotFound => TransportError::NotFound(path.to_string()),
        io::ErrorKind::PermissionDenied => TransportError::Auth(format!("{path}: {err}")),
        _ => TransportError::Network(format!("{path}: {err}")),
    }
}

async fn bounded<T, F>(limit: Duration, path: &str, fut: F) -> TransportResult<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| map_io_error(e, path)),
        Err(_) => Err(TransportError::Network(format!(
            "{path}: timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl FileTransport for LocalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> TransportResult<()> {
        let target = self.resolve(path);
        bounded(self.timeouts.write, path, async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await
        })
        .await
    }

    async fn get(&self, path: &str) -> TransportResult<Vec<u8>> {
        bounded(self.timeouts.read, path, tokio::fs::read(self.resolve(path))).await
    }

    async fn list(&self, dir: &str, pattern: &str) -> TransportResult<Vec<String>> {
        let matcher = file_matcher(pattern)?;
        let target = self.resolve(dir);
        let listed = bounded(self.timeouts.read, dir, async {
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&target).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Ok(names)
        })
        .await;
        match listed {
            Ok(names) => Ok(names.into_iter().filter(|n| matcher.is_match(n)).collect()),
            Err(TransportError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, path: &str) -> TransportResult<()> {
        bounded(self.timeouts.write, path, tokio::fs::remove_file(self.resolve(path))).await
    }

    async fn rename(&self, from: &str, to: &str) -> TransportResult<()> {
        let (source, target) = (self.resolve(from), self.resolve(to));
        bounded(self.timeouts.write, from, async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&source, &target).await
        })
        .await
    }

    fn supports_rename(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suppaftp::types::Response;

    fn reply(status: Status) -> FtpError {
        FtpError::UnexpectedResponse(Response::new(status, Vec::new()))
    }

    #[test]
    fn ftp_replies_map_to_transport_errors() {
        assert!(matches!(
            map_ftp_error(reply(Status::FileUnavailable), "requests/a.json"),
            TransportError::NotFound(path) if path == "requests/a.json"
        ));
        assert!(matches!(
            map_ftp_error(reply(Status::NotLoggedIn), "requests/a.json"),
            TransportError::Auth(_)
        ));
        assert!(matches!(
            map_ftp_error(reply(Status::CommandNotImplemented), "requests/a.json"),
            TransportError::Network(_)
        ));
    }

    #[test]
    fn rejected_login_is_an_auth_failure() {
        assert!(matches!(
            map_login_error(reply(Status::NotLoggedIn), "bridge"),
            TransportError::Auth(msg) if msg.contains("bridge")
        ));
        let io = FtpError::ConnectionError(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(map_login_error(io, "bridge"), TransportError::Network(_)));
    }

    #[test]
    fn refused_rename_with_source_present_is_not_a_lost_race() {
        let err = rename_failure(
            TransportError::NotFound("requests/a.json".into()),
            "requests/a.json",
            "requests/claimed/a.json",
            true,
        );
        assert!(matches!(err, TransportError::Network(msg) if msg.contains("claimed/a.json")));

        let err = rename_failure(
            TransportError::NotFound("requests/a.json".into()),
            "requests/a.json",
            "requests/claimed/a.json",
            false,
        );
        assert!(err.is_not_found());

        let err = rename_failure(
            TransportError::Auth("expired".into()),
            "requests/a.json",
            "requests/claimed/a.json",
            true,
        );
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[test]
    fn parent_dir_strips_the_file_name() {
        assert_eq!(parent_dir("requests/claimed/a.json"), Some("requests/claimed"));
        assert_eq!(parent_dir("/root/requests/a.json"), Some("/root/requests"));
        assert_eq!(parent_dir("a.json"), None);
    }

    #[tokio::test]
    async fn blocking_work_past_its_deadline_is_a_network_error() {
        let started = std::time::Instant::now();
        let result: TransportResult<()> =
            blocking_within("get", Duration::from_millis(50), || {
                std::thread::sleep(Duration::from_millis(600));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TransportError::Network(msg)) if msg.contains("50ms")));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn blocking_work_within_its_deadline_returns_its_result() {
        let result = blocking_within("list", Duration::from_secs(5), || Ok(7)).await;
        assert_eq!(result.ok(), Some(7));
    }
}
