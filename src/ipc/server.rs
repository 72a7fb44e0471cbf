//! Unix domain socket server for IPC
//!
//! Provides request-response communication for capture control and pushes
//! presentation updates to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{PresentationEvent, PresentationView};
use crate::session::ControlCommand;

use super::protocol::{DaemonStatus, Request, Response};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    commands: mpsc::Sender<ControlCommand>,
    /// Source of presentation updates for subscribed clients
    events: broadcast::Sender<PresentationEvent>,
}

/// Shared server state
struct ServerState {
    view: PresentationView,
    start_time: Instant,
}

/// What a client handler needs from the server
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    commands: mpsc::Sender<ControlCommand>,
    events: broadcast::Sender<PresentationEvent>,
}

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Notification forwarder, stopped when the client handler goes away
struct Forwarder(JoinHandle<()>);

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        commands: mpsc::Sender<ControlCommand>,
        events: broadcast::Sender<PresentationEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            view: PresentationView::default(),
            start_time: Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            commands,
            events,
        })
    }

    /// Fold a presentation update into the view reported by `get_status`
    pub async fn apply_event(&self, event: &PresentationEvent) {
        let mut state = self.state.write().await;
        let was_enabled = state.view.capture_enabled;
        state.view.apply(event);

        if was_enabled != state.view.capture_enabled {
            info!(enabled = state.view.capture_enabled, "IPC server: capture availability updated");
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = ClientContext {
                        state: Arc::clone(&self.state),
                        commands: self.commands.clone(),
                        events: self.events.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<Forwarder> = None;

        while let Some(msg_buf) = read_message(&mut reader).await? {
            let request: Request =
                serde_json::from_slice(&msg_buf).context("failed to parse request")?;

            debug!(?request, "received request");

            if request == Request::Subscribe {
                if forwarder.is_some() {
                    write_message(&mut *writer.lock().await, &Response::Subscribed).await?;
                    continue;
                }
                // Subscribe before confirming so no update is missed
                let events = context.events.subscribe();
                write_message(&mut *writer.lock().await, &Response::Subscribed).await?;
                debug!("client subscribed to notifications");
                forwarder = Some(Forwarder(tokio::spawn(forward_notifications(
                    events,
                    Arc::clone(&writer),
                ))));
                continue;
            }

            let response = Self::process_request(request, &context).await;
            write_message(&mut *writer.lock().await, &response).await?;
        }

        debug!("client disconnected");
        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, context: &ClientContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if context
                    .commands
                    .send(ControlCommand::Snapshot(reply_tx))
                    .await
                    .is_err()
                {
                    return controller_unavailable();
                }
                let Ok(session) = reply_rx.await else {
                    return controller_unavailable();
                };

                let state = context.state.read().await;
                Response::Status(DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    session,
                    view: state.view.clone(),
                    uptime_secs: state.start_time.elapsed().as_secs(),
                })
            }

            Request::StartCapture => {
                if !context.state.read().await.view.capture_enabled {
                    return Response::error("capture_disabled", "translation model is not loaded");
                }
                info!("capture start requested via IPC");
                Self::send_command(context, ControlCommand::Start).await
            }

            Request::StopCapture => {
                info!("capture stop requested via IPC");
                Self::send_command(context, ControlCommand::Stop).await
            }

            // Handled by the connection loop
            Request::Subscribe => Response::Subscribed,
        }
    }

    async fn send_command(context: &ClientContext, command: ControlCommand) -> Response {
        match context.commands.send(command).await {
            Ok(()) => Response::Ack,
            Err(_) => controller_unavailable(),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn controller_unavailable() -> Response {
    Response::error("controller_unavailable", "session controller is not running")
}

/// Push presentation updates to a subscribed client until it goes away
async fn forward_notifications(
    mut events: broadcast::Receiver<PresentationEvent>,
    writer: SharedWriter,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let notification = Response::Notification { event };
                if let Err(e) = write_message(&mut *writer.lock().await, &notification).await {
                    debug!(?e, "subscriber write failed, stopping notifications");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged, notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Read one length-prefixed message. Returns `None` when the peer disconnects.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    // Read message body
    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
