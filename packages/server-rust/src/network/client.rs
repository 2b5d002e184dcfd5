//! Consuming side of the transport.
//!
//! A [`ClientConnection`] pipelines requests over one TCP connection. A
//! single driver task owns the socket and the [`PendingQueue`] of
//! outstanding requests; responses are matched to requests strictly in the
//! order the requests were written.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arkalix_core::scheduler::{InFlightGuard, ShutdownRegistry};
use arkalix_core::{Deferred, Fault, Future, Outcome, PendingQueue, Scheduler, SchedulerExt};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use super::config::ConnectionConfig;
use super::frame::{ClientCodec, RequestFrame, ResponseFrame, TransportError};
use crate::service::Encoding;

/// Fault kind of [`ClientResponse::ensure_success`] failures.
pub const CLIENT_RESPONSE_FAULT: &str = "client-response";

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// Request sent to a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    path: String,
    body: Bytes,
}

impl ClientRequest {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn into_frame(self) -> RequestFrame {
        RequestFrame {
            path: self.path,
            body: self.body,
        }
    }
}

/// Response received from a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    status: StatusCode,
    encoding: Option<Encoding>,
    body: Bytes,
}

impl ClientResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn encoding(&self) -> Option<&Encoding> {
        self.encoding.as_ref()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body interpreted as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid UTF-8.
    pub fn body_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Passes a `2xx` response through; any other status becomes a
    /// [`CLIENT_RESPONSE_FAULT`] failure carrying a [`ClientResponseError`].
    ///
    /// # Errors
    ///
    /// Fails if the status is not in the `2xx` range.
    pub fn ensure_success(self) -> Outcome<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(Fault::custom(
            CLIENT_RESPONSE_FAULT,
            ClientResponseError {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            },
        ))
    }
}

impl From<ResponseFrame> for ClientResponse {
    fn from(frame: ResponseFrame) -> Self {
        Self {
            status: frame.status,
            encoding: frame.encoding,
            body: frame.body,
        }
    }
}

/// A remote service answered with a non-success status.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unexpected response status {status}")]
pub struct ClientResponseError {
    pub status: StatusCode,
    pub body: String,
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

struct Command {
    frame: RequestFrame,
    deferred: Deferred<ClientResponse>,
}

/// Pipelined connection to a remote service provider.
///
/// Dropping the connection closes it once outstanding responses arrive.
pub struct ClientConnection {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    commands: mpsc::Sender<Command>,
    close_tx: watch::Sender<bool>,
    live: Arc<AtomicBool>,
    lifecycle: Arc<ShutdownRegistry>,
}

impl ClientConnection {
    /// Connects to `remote_addr`, establishing the connection on `scheduler`.
    ///
    /// While open, the connection counts as in-flight work of `scheduler`.
    pub fn connect(
        scheduler: &dyn Scheduler,
        remote_addr: SocketAddr,
        config: ConnectionConfig,
    ) -> Future<ClientConnection> {
        scheduler.spawn(open(remote_addr, config, scheduler.in_flight_guard()))
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns `true` while the connection accepts new requests.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !*self.close_tx.borrow()
    }

    /// Sends `request`, resolving with its response.
    ///
    /// Fails immediately if the connection is closed or its command queue is
    /// full. Cancelling the returned future does not withdraw the request;
    /// its response is read and discarded.
    pub fn send(&self, request: ClientRequest) -> Future<ClientResponse> {
        let (deferred, future) = Deferred::pair();
        if !self.is_live() {
            deferred.fail(TransportError::Closed);
            return future;
        }
        let command = Command {
            frame: request.into_frame(),
            deferred,
        };
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                command.deferred.fail(TransportError::Busy);
            }
            Err(TrySendError::Closed(command)) => {
                command.deferred.fail(TransportError::Closed);
            }
        }
        future
    }

    /// Sends `request` and then closes the connection once its response,
    /// and any earlier ones, have arrived.
    pub fn send_and_close(&self, request: ClientRequest) -> Future<ClientResponse> {
        let response = self.send(request);
        drop(self.close());
        response
    }

    /// Closes the connection.
    ///
    /// Requests already sent still receive their responses. The returned
    /// future resolves once the socket is closed.
    pub fn close(&self) -> Future<()> {
        self.close_tx.send_replace(true);
        self.lifecycle.termination()
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

async fn open(
    remote_addr: SocketAddr,
    config: ConnectionConfig,
    tracker: InFlightGuard,
) -> Outcome<ClientConnection> {
    let Ok(connected) = tokio::time::timeout(config.connect_timeout, TcpStream::connect(remote_addr)).await
    else {
        return Err(TransportError::ConnectTimeout(remote_addr).into());
    };
    let stream = connected?;
    stream.set_nodelay(true)?;
    let local_addr = stream.local_addr()?;

    let (commands, command_rx) = mpsc::channel(config.command_channel_capacity);
    let (close_tx, close_rx) = watch::channel(false);
    let live = Arc::new(AtomicBool::new(true));
    let lifecycle = Arc::new(ShutdownRegistry::new());
    let framed = Framed::new(stream, ClientCodec::new(config.max_frame_length));
    tokio::spawn(drive(
        framed,
        command_rx,
        close_rx,
        Arc::clone(&live),
        Arc::clone(&lifecycle),
        remote_addr,
        tracker,
    ));

    debug!(%local_addr, %remote_addr, "client connection established");
    Ok(ClientConnection {
        local_addr,
        remote_addr,
        commands,
        close_tx,
        live,
        lifecycle,
    })
}

async fn drive(
    mut framed: Framed<TcpStream, ClientCodec>,
    mut commands: mpsc::Receiver<Command>,
    mut close_rx: watch::Receiver<bool>,
    live: Arc<AtomicBool>,
    lifecycle: Arc<ShutdownRegistry>,
    remote_addr: SocketAddr,
    _tracker: InFlightGuard,
) {
    let mut pending: PendingQueue<ClientResponse> = PendingQueue::new();
    let mut accepting = true;

    let fault: Option<Fault> = 'drive: loop {
        if !accepting && pending.is_empty() {
            break 'drive None;
        }
        tokio::select! {
            changed = close_rx.changed(), if accepting => {
                if changed.is_ok() && !*close_rx.borrow() {
                    continue 'drive;
                }
                // Requests queued before the close still go out.
                accepting = false;
                commands.close();
                while let Ok(command) = commands.try_recv() {
                    pending.push_deferred(command.deferred);
                    if let Err(error) = framed.feed(command.frame).await {
                        break 'drive Some(error.into());
                    }
                }
                if let Err(error) = framed.flush().await {
                    break 'drive Some(error.into());
                }
            }
            command = commands.recv(), if accepting => match command {
                Some(command) => {
                    pending.push_deferred(command.deferred);
                    if let Err(error) = framed.send(command.frame).await {
                        break 'drive Some(error.into());
                    }
                }
                None => accepting = false,
            },
            frame = framed.next() => match frame {
                Some(Ok(response)) => {
                    if let Err(violation) = pending.complete_next(Ok(ClientResponse::from(response))) {
                        error!(%remote_addr, error = %violation, "closing connection");
                        break 'drive Some(Fault::custom("protocol-violation", violation));
                    }
                }
                Some(Err(error)) => break 'drive Some(error.into()),
                None => break 'drive Some(TransportError::Closed.into()),
            },
        }
    };

    live.store(false, Ordering::Release);
    let fault = fault.unwrap_or_else(|| TransportError::Closed.into());
    commands.close();
    while let Ok(command) = commands.try_recv() {
        command.deferred.fail(fault.clone());
    }
    let failed = pending.fail_all(&fault);
    if failed > 0 {
        debug!(%remote_addr, failed, %fault, "failed outstanding requests");
    }
    if let Err(error) = framed.close().await {
        debug!(%remote_addr, %error, "error closing connection");
    }

    lifecycle.begin_shutdown(Duration::ZERO);
    lifecycle.mark_shutdown();
    debug!(%remote_addr, "client connection closed");
}
