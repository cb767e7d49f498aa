use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use ssh2::{HashType, RenameFlags, Session, Sftp};
use tracing::{debug, trace, warn};

use crate::config::SftpConfig;
use crate::transfer::{TransferClient, TransferClientFactory};

const TEMP_FILE_SUFFIX: &str = ".part";
const DISCONNECT_DESCRIPTION: &str = "s3relay transfer complete";

/// Creates [`SftpTransferClient`]s for the configured server.
#[derive(Clone)]
pub struct SftpTransferClientFactory {
    config: SftpConfig,
}

impl SftpTransferClientFactory {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }
}

impl TransferClientFactory for SftpTransferClientFactory {
    fn create_client(&self) -> Box<dyn TransferClient> {
        Box::new(SftpTransferClient::new(self.config.clone()))
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

/// `ssh2` based SFTP client.
///
/// libssh2 is blocking, so every call runs on the blocking pool. The session
/// is moved into the blocking closure and handed back afterwards.
pub struct SftpTransferClient {
    config: SftpConfig,
    inner: Option<SftpSession>,
}

impl SftpTransferClient {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            inner: None,
        }
    }

    async fn with_session<T, F>(&mut self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SftpSession) -> Result<T> + Send + 'static,
    {
        let session = self
            .inner
            .take()
            .ok_or_else(|| anyhow!("SFTP session to {} is not connected.", self.config.host))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = operation(&session);
            (session, result)
        })
        .await
        .context("tokio::task::spawn_blocking() failed.")?;

        self.inner = Some(session);
        result
    }
}

#[async_trait]
impl TransferClient for SftpTransferClient {
    async fn connect(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&config))
            .await
            .context("tokio::task::spawn_blocking() failed.")??;

        debug!(
            host = self.config.host,
            port = self.config.port,
            "SFTP session established."
        );
        self.inner = Some(session);
        Ok(())
    }

    async fn ensure_directory(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_session(move |session| ensure_directory_blocking(&session.sftp, &path))
            .await
    }

    async fn upload(&mut self, payload: Vec<u8>, remote_path: &str) -> Result<()> {
        let remote_path = remote_path.to_string();
        let via_temp_file = self.config.upload_via_temp_file;
        self.with_session(move |session| {
            upload_blocking(&session.sftp, &payload, &remote_path, via_temp_file)
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || {
            let SftpSession { session, sftp } = inner;
            drop(sftp);
            session
                .disconnect(None, DISCONNECT_DESCRIPTION, None)
                .context("ssh2::Session::disconnect() failed.")
        })
        .await
        .context("tokio::task::spawn_blocking() failed.")?
    }
}

fn open_session(config: &SftpConfig) -> Result<SftpSession> {
    let timeout = Duration::from_millis(config.connect_timeout_milliseconds);

    let address = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}:{}", config.host, config.port))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}:{}", config.host, config.port))?;

    let tcp = TcpStream::connect_timeout(&address, timeout)
        .with_context(|| format!("failed to connect to {address}"))?;

    let mut session = Session::new().context("ssh2::Session::new() failed.")?;
    session.set_timeout(u32::try_from(config.connect_timeout_milliseconds).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .context("ssh2::Session::handshake() failed.")?;

    if let Some(expected) = config.host_key_sha256.as_deref() {
        verify_host_key(&session, expected)?;
    }

    session
        .userauth_password(&config.credentials.username, &config.credentials.password)
        .with_context(|| {
            format!(
                "password authentication failed for user '{}'",
                config.credentials.username
            )
        })?;
    if !session.authenticated() {
        bail!(
            "server did not accept authentication for user '{}'",
            config.credentials.username
        );
    }

    let sftp = session.sftp().context("ssh2::Session::sftp() failed.")?;
    Ok(SftpSession { session, sftp })
}

fn verify_host_key(session: &Session, expected: &str) -> Result<()> {
    let actual = session
        .host_key_hash(HashType::Sha256)
        .map(to_hex)
        .ok_or_else(|| anyhow!("server did not provide a SHA-256 host key hash"))?;

    if actual != expected {
        bail!("host key mismatch: expected SHA-256 {expected}, got {actual}");
    }
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn ensure_directory_blocking(sftp: &Sftp, path: &str) -> Result<()> {
    let absolute = path.starts_with('/');
    let mut current = String::new();

    for component in path.split('/').filter(|c| !c.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);

        let dir = Path::new(&current);
        match sftp.stat(dir) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => bail!("'{current}' exists but is not a directory"),
            Err(_) => {}
        }

        if let Err(e) = sftp.mkdir(dir, 0o755) {
            // Created concurrently by another writer.
            if sftp.stat(dir).is_ok_and(|stat| stat.is_dir()) {
                trace!(path = current, "directory appeared during creation.");
                continue;
            }
            return Err(anyhow!(e).context(format!("failed to create directory '{current}'")));
        }
        debug!(path = current, "created remote directory.");
    }

    Ok(())
}

fn upload_blocking(sftp: &Sftp, payload: &[u8], remote_path: &str, via_temp_file: bool) -> Result<()> {
    if !via_temp_file {
        return write_and_verify(sftp, payload, remote_path);
    }

    let temp_path = temp_path_for(remote_path);
    let result = write_and_verify(sftp, payload, &temp_path)
        .and_then(|_| rename_over(sftp, &temp_path, remote_path));

    if result.is_err() {
        if let Err(e) = sftp.unlink(Path::new(&temp_path)) {
            warn!(path = temp_path, error = %e, "failed to remove temporary upload file.");
        }
    }
    result
}

fn write_and_verify(sftp: &Sftp, payload: &[u8], path: &str) -> Result<()> {
    {
        let mut file = sftp
            .create(Path::new(path))
            .with_context(|| format!("failed to open '{path}' for writing"))?;
        file.write_all(payload)
            .with_context(|| format!("failed to write '{path}'"))?;
        file.flush()
            .with_context(|| format!("failed to flush '{path}'"))?;
    }

    let written = sftp
        .stat(Path::new(path))
        .with_context(|| format!("failed to stat '{path}' after upload"))?
        .size
        .unwrap_or_default();
    let expected = payload.len() as u64;
    if written != expected {
        bail!("short write to '{path}': {written} of {expected} bytes");
    }
    Ok(())
}

fn rename_over(sftp: &Sftp, from: &str, to: &str) -> Result<()> {
    let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
    if sftp.rename(Path::new(from), Path::new(to), flags).is_ok() {
        return Ok(());
    }

    // SFTPv3 servers ignore the overwrite flag; replace an existing file by hand.
    if sftp.stat(Path::new(to)).is_ok() {
        sftp.unlink(Path::new(to))
            .with_context(|| format!("failed to replace existing '{to}'"))?;
    }
    sftp.rename(Path::new(from), Path::new(to), flags)
        .with_context(|| format!("failed to rename '{from}' to '{to}'"))
}

/// `/a/b/file.pdf` -> `/a/b/.file.pdf.part`
fn temp_path_for(remote_path: &str) -> String {
    match remote_path.rsplit_once('/') {
        Some((directory, file)) => format!("{directory}/.{file}{TEMP_FILE_SUFFIX}"),
        None => format!(".{remote_path}{TEMP_FILE_SUFFIX}"),
    }
}
