//! Feed relay - hands verified feed bytes to a freshly launched client.
//!
//! The relay listens on a Unix socket private to the current user and
//! serves exactly one connection. [`RelayServer::start`] binds inside a new
//! directory created with mode 0700, so no other user can reach the socket
//! even before it is narrowed to 0600. It tears itself down when that client
//! sends `close` or disconnects, when nobody connects within the accept
//! timeout, or when [`RelayServer::stop`] is called. The socket file (and the
//! private directory holding it) is removed on every one of those paths.

pub mod client;
pub mod protocol;

use crate::feed::FeedDocuments;
use crate::utils::errors::{Result, UpdateError};
use protocol::Command;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use client::RelayClient;
pub use protocol::Status;

const SOCKET_MODE: u32 = 0o600;
const PRIVATE_DIR_MODE: u32 = 0o700;
const SOCKET_NAME: &str = "relay.sock";

/// Fresh directory name for one relay inside `socket_dir`.
pub fn private_dir_path(socket_dir: &Path) -> PathBuf {
    let suffix = Uuid::new_v4().simple().to_string();
    socket_dir.join(format!(
        "update-agent-{}-{}",
        std::process::id(),
        &suffix[..8]
    ))
}

/// Where the socket lives, and the directory created for it if any.
#[derive(Debug, Clone)]
struct SocketLocation {
    socket: PathBuf,
    private_dir: Option<PathBuf>,
}

impl SocketLocation {
    fn remove(&self) {
        remove_socket_file(&self.socket);
        if let Some(dir) = &self.private_dir {
            match std::fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove relay directory {}: {}", dir.display(), e),
            }
        }
    }
}

/// Removes the socket file when dropped.
struct SocketFile(SocketLocation);

impl Drop for SocketFile {
    fn drop(&mut self) {
        self.0.remove();
    }
}

/// A single-use relay session.
pub struct RelayServer {
    location: SocketLocation,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl RelayServer {
    /// Bind `<socket_dir>/update-agent-<pid>-<random>/relay.sock` and start
    /// serving. The directory is created here with mode 0700 and must not
    /// exist beforehand.
    pub fn start(
        documents: FeedDocuments,
        socket_dir: &Path,
        accept_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let private_dir = create_private_dir(socket_dir)?;
        let location = SocketLocation {
            socket: private_dir.join(SOCKET_NAME),
            private_dir: Some(private_dir),
        };
        Self::serve_at(location, documents, accept_timeout, shutdown_timeout)
    }

    /// Bind an explicit socket path and start serving.
    ///
    /// The caller is responsible for the directory being private.
    pub fn start_at(
        socket_path: PathBuf,
        documents: FeedDocuments,
        accept_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let location = SocketLocation {
            socket: socket_path,
            private_dir: None,
        };
        Self::serve_at(location, documents, accept_timeout, shutdown_timeout)
    }

    fn serve_at(
        location: SocketLocation,
        documents: FeedDocuments,
        accept_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let listener = match bind(&location.socket) {
            Ok(listener) => listener,
            Err(e) => {
                if let Some(dir) = &location.private_dir {
                    let _ = std::fs::remove_dir(dir);
                }
                return Err(e);
            }
        };
        let socket_path = &location.socket;
        let cancel = CancellationToken::new();

        info!(
            "Feed relay listening on {} (accept timeout {}s)",
            socket_path.display(),
            accept_timeout.as_secs()
        );

        let handle = tokio::spawn(run(
            listener,
            SocketFile(location.clone()),
            documents,
            accept_timeout,
            cancel.clone(),
        ));

        Ok(Self {
            location,
            cancel,
            handle: Some(handle),
            shutdown_timeout,
        })
    }

    /// Identifier the child process uses to connect: the socket path.
    pub fn channel_id(&self) -> String {
        self.location.socket.display().to_string()
    }

    pub fn socket_path(&self) -> &Path {
        &self.location.socket
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait until the relay shuts down on its own.
    pub async fn wait(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Feed relay task failed: {}", e);
            }
        }
        self.location.remove();
    }

    /// Shut the relay down, closing any client connection.
    ///
    /// Waits up to the shutdown timeout for the serving task, then aborts it.
    /// The socket file is gone when this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Feed relay stopped"),
                Ok(Err(e)) => warn!("Feed relay task failed: {}", e),
                Err(_) => {
                    warn!("Feed relay did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        self.location.remove();
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            handle.abort();
            self.location.remove();
        }
    }
}

/// Create a new owner-only directory below `socket_dir`.
fn create_private_dir(socket_dir: &Path) -> Result<PathBuf> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::create_dir_all(socket_dir)?;
    let dir = private_dir_path(socket_dir);
    std::fs::DirBuilder::new()
        .mode(PRIVATE_DIR_MODE)
        .create(&dir)
        .map_err(|e| UpdateError::Relay(format!("failed to create {}: {e}", dir.display())))?;
    Ok(dir)
}

fn bind(socket_path: &Path) -> Result<UnixListener> {
    remove_stale_socket(socket_path)?;

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| {
        UpdateError::Relay(format!("failed to bind {}: {e}", socket_path.display()))
    })?;

    use std::os::unix::fs::PermissionsExt;
    if let Err(e) =
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
    {
        remove_socket_file(socket_path);
        return Err(UpdateError::Relay(format!(
            "failed to restrict {}: {e}",
            socket_path.display()
        )));
    }

    Ok(listener)
}

/// A leftover socket from a process that reused our pid.
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            std::fs::remove_file(path)?;
            debug!("Removed stale socket {}", path.display());
            Ok(())
        }
        Ok(_) => Err(UpdateError::Relay(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed relay socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove relay socket {}: {}", path.display(), e),
    }
}

async fn run(
    listener: UnixListener,
    socket_file: SocketFile,
    documents: FeedDocuments,
    accept_timeout: Duration,
    cancel: CancellationToken,
) {
    let _socket_file = socket_file;

    let stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Feed relay accept failed: {}", e);
                return;
            }
        },
        _ = tokio::time::sleep(accept_timeout) => {
            info!("No client connected to the feed relay, shutting down");
            return;
        }
        _ = cancel.cancelled() => return,
    };

    // One client only; later connects are refused
    drop(listener);
    debug!("Feed relay client connected");

    tokio::select! {
        served = serve(stream, &documents) => match served {
            Ok(()) => info!("Feed relay session finished"),
            Err(e) => warn!("Feed relay connection failed: {}", e),
        },
        _ = cancel.cancelled() => debug!("Feed relay cancelled with client attached"),
    }
}

async fn serve(mut stream: UnixStream, documents: &FeedDocuments) -> io::Result<()> {
    let mut command = [0u8; 1];

    loop {
        match stream.read_exact(&mut command).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }

        match Command::from_byte(command[0]) {
            Some(Command::Close) => return Ok(()),
            Some(cmd) => {
                let payload = cmd.select(documents).map(|b| &b[..]).unwrap_or_default();
                protocol::write_payload(&mut stream, payload).await?;
            }
            None => {
                debug!("Unknown relay command {:#04x}", command[0]);
                protocol::write_status(&mut stream, Status::Error).await?;
            }
        }
    }
}
