//! Serving side of the transport.
//!
//! A [`ServiceServer`] owns one TCP listener and the services it provides.
//! Lifecycle:
//! 1. `bind()` -- binds the listener through a scheduler and starts accepting
//! 2. `provide()` -- registers services under their base paths
//! 3. `close()` -- stops accepting, asks every connection to stop reading,
//!    and waits for outstanding responses up to the grace period
//!
//! Each accepted connection is driven by its own task, which hands requests
//! to handlers on a per-connection [`ReactorScheduler`] and writes responses
//! strictly in the order their requests arrived.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arkalix_core::scheduler::{InFlightGuard, ShutdownRegistry};
use arkalix_core::{
    Fault, Future, Outcome, ReactorScheduler, Scheduler, SchedulerExt, SchedulerState,
};
use futures_util::stream::{FuturesOrdered, StreamExt};
use futures_util::SinkExt;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::config::ConnectionConfig;
use super::connection::{ConnectionHandle, ConnectionRegistry};
use super::frame::{RequestFrame, ResponseFrame, ServerCodec};
use crate::service::{
    Service, ServiceDescription, ServiceHandle, ServiceRequest, ServiceResponse, ServiceRouter,
};

/// State shared between the server handle, its accept loop and its
/// connection drivers.
struct Shared {
    router: Arc<ServiceRouter>,
    connections: ConnectionRegistry,
    config: ConnectionConfig,
}

/// A listening server providing services over framed TCP.
pub struct ServiceServer {
    local_addr: SocketAddr,
    runtime: Handle,
    shared: Arc<Shared>,
    lifecycle: Arc<ShutdownRegistry>,
    stop_tx: watch::Sender<bool>,
    grace: Duration,
    // Keeps the scheduler from stopping until this server has closed.
    tracker: Mutex<Option<InFlightGuard>>,
}

impl ServiceServer {
    /// Binds a server to `addr` on `scheduler`.
    ///
    /// Port `0` binds an OS-assigned port; see [`ServiceServer::local_addr`].
    /// `grace` bounds how long [`ServiceServer::close`] waits for
    /// outstanding responses. Until the server has closed, `scheduler`
    /// counts it as in-flight work when shutting down.
    pub fn bind(
        scheduler: &dyn Scheduler,
        addr: SocketAddr,
        config: ConnectionConfig,
        grace: Duration,
    ) -> Future<Arc<ServiceServer>> {
        scheduler.spawn(start(addr, config, grace, scheduler.in_flight_guard()))
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `true` if this server is running and no provided service owns
    /// `description`'s base path.
    #[must_use]
    pub fn can_provide(&self, description: &ServiceDescription) -> bool {
        self.lifecycle.is_running() && !self.shared.router.contains(description.base_path())
    }

    /// Starts providing `service` on behalf of the system `system_name`.
    ///
    /// # Errors
    ///
    /// Fails with [`Fault::ShuttingDown`] once the server is closing, or with
    /// a `"service"` fault if the base path is already provided.
    pub fn provide(&self, service: Service, system_name: &str) -> Outcome<ServiceHandle> {
        if !self.lifecycle.is_running() {
            return Err(Fault::ShuttingDown);
        }
        let service = service.provided_by(system_name, self.local_addr);
        let registered = self.shared.router.register(service)?;
        let description = registered.description().clone();
        info!(
            service = %description.name(),
            base_path = %description.base_path(),
            local_addr = %self.local_addr,
            "providing service"
        );
        Ok(ServiceHandle::new(description, &self.shared.router))
    }

    /// Descriptions of every service currently provided.
    #[must_use]
    pub fn provided_services(&self) -> Vec<ServiceDescription> {
        self.shared.router.descriptions()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.count()
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        !self.lifecycle.is_running()
    }

    /// Closes the server.
    ///
    /// The listener stops accepting, connections stop reading and finish
    /// writing responses to requests already received. The returned future
    /// resolves once every connection is gone or the grace period elapsed.
    /// Calling this again returns a future for the same termination.
    pub fn close(&self) -> Future<()> {
        let termination = self.lifecycle.termination();
        if !self.lifecycle.begin_shutdown(self.grace) {
            return termination;
        }

        self.stop_tx.send_replace(true);
        let handles = self.shared.connections.drain_all();
        if !handles.is_empty() {
            info!(local_addr = %self.local_addr, connections = handles.len(), "closing connections");
        }
        for handle in &handles {
            handle.close();
        }
        self.shared.router.clear();

        let lifecycle = Arc::clone(&self.lifecycle);
        let grace = self.grace;
        let local_addr = self.local_addr;
        let tracker = self.tracker.lock().take();
        self.runtime.spawn(async move {
            let _tracker = tracker;
            if lifecycle.wait_for_drain(grace).await {
                debug!(%local_addr, "server drained");
            } else {
                warn!(%local_addr, "grace period elapsed with connections still open");
            }
            lifecycle.mark_shutdown();
            info!(%local_addr, "server closed");
        });
        termination
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

impl std::fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("services", &self.shared.router.len())
            .field("connections", &self.shared.connections.count())
            .finish_non_exhaustive()
    }
}

async fn start(
    addr: SocketAddr,
    config: ConnectionConfig,
    grace: Duration,
    tracker: InFlightGuard,
) -> Outcome<Arc<ServiceServer>> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let shared = Arc::new(Shared {
        router: Arc::new(ServiceRouter::new()),
        connections: ConnectionRegistry::new(),
        config,
    });
    let lifecycle = Arc::new(ShutdownRegistry::new());
    let (stop_tx, stop_rx) = watch::channel(false);
    let runtime = Handle::current();
    runtime.spawn(accept_loop(
        listener,
        Arc::clone(&shared),
        Arc::clone(&lifecycle),
        stop_rx,
        tracker.clone(),
    ));

    info!(%local_addr, "service server listening");
    Ok(Arc::new(ServiceServer {
        local_addr,
        runtime,
        shared,
        lifecycle,
        stop_tx,
        grace,
        tracker: Mutex::new(Some(tracker)),
    }))
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    lifecycle: Arc<ShutdownRegistry>,
    mut stop_rx: watch::Receiver<bool>,
    tracker: InFlightGuard,
) {
    let _guard = lifecycle.in_flight_guard();
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let (handle, close_rx) = shared.connections.register(peer_addr);
                    // close() may have drained the registry before this
                    // connection was added.
                    if *stop_rx.borrow() {
                        handle.close();
                    }
                    debug!(connection = handle.id.0, %peer_addr, "connection accepted");
                    tokio::spawn(serve_connection(
                        stream,
                        handle,
                        close_rx,
                        Arc::clone(&shared),
                        (lifecycle.in_flight_guard(), tracker.clone()),
                    ));
                }
                Err(error) => warn!(%error, "failed to accept connection"),
            },
        }
    }
    debug!("accept loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    handle: Arc<ConnectionHandle>,
    mut close_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
    _guards: (InFlightGuard, InFlightGuard),
) {
    let id = handle.id.0;
    let peer_addr = handle.peer_addr;
    let reactor = Arc::new(ReactorScheduler::start(format!("connection-{id}")));
    let mut framed = Framed::new(stream, ServerCodec::new(shared.config.max_frame_length));
    let mut responses = FuturesOrdered::new();
    let mut reading = !*close_rx.borrow();

    loop {
        tokio::select! {
            changed = close_rx.changed(), if reading => {
                if changed.is_err() || *close_rx.borrow() {
                    reading = false;
                }
            }
            frame = framed.next(), if reading => match frame {
                Some(Ok(request)) => {
                    responses.push_back(dispatch(&shared.router, &reactor, peer_addr, request).into_async());
                }
                Some(Err(error)) => {
                    warn!(connection = id, %peer_addr, %error, "unreadable request; closing connection");
                    reading = false;
                }
                None => reading = false,
            },
            Some(outcome) = responses.next(), if !responses.is_empty() => {
                if let Err(error) = framed.send(response_frame(outcome)).await {
                    debug!(connection = id, %peer_addr, %error, "failed to write response");
                    break;
                }
            }
            else => break,
        }
    }

    shared.connections.remove(handle.id);
    drop(reactor.shutdown(Duration::ZERO));
    debug!(connection = id, %peer_addr, "connection closed");
}

/// Routes `request` to its service, on the connection's reactor.
fn dispatch(
    router: &ServiceRouter,
    reactor: &Arc<ReactorScheduler>,
    peer_addr: SocketAddr,
    request: RequestFrame,
) -> Future<ServiceResponse> {
    let Some(service) = router.resolve(&request.path) else {
        debug!(path = %request.path, "no service provided for path");
        return Future::success(ServiceResponse::with_status(StatusCode::NOT_FOUND));
    };
    let request = ServiceRequest::new(request.path, request.body, peer_addr, Arc::clone(reactor));
    reactor
        .execute(move || Ok(service.handler().handle(request)))
        .flat_map(std::convert::identity)
}

fn response_frame(outcome: Outcome<ServiceResponse>) -> ResponseFrame {
    let response = outcome.unwrap_or_else(|fault| {
        warn!(%fault, "service handler failed");
        ServiceResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR)
    });
    let (status, encoding, body) = response.into_parts();
    ResponseFrame {
        status,
        encoding,
        body,
    }
}

#[cfg(test)]
mod tests {
    use arkalix_core::RuntimeScheduler;

    use super::*;
    use crate::service::{AccessPolicy, Encoding};

    fn loopback() -> SocketAddr {
        ([127, 0, 0, 1], 0).into()
    }

    fn echo(base_path: &str) -> Service {
        let description = ServiceDescription::new(
            "echo",
            base_path,
            vec![Encoding::JSON],
            AccessPolicy::Unrestricted,
        )
        .unwrap();
        Service::new(description, |request: ServiceRequest| {
            let mut response = ServiceResponse::new();
            response.body_bytes(request.body().clone());
            Future::success(response)
        })
    }

    async fn bound() -> Arc<ServiceServer> {
        let scheduler = RuntimeScheduler::from_handle(Handle::current());
        ServiceServer::bind(
            &scheduler,
            loopback(),
            ConnectionConfig::default(),
            Duration::from_secs(1),
        )
        .into_async()
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn bind_assigns_port() {
        let server = bound().await;
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.state(), SchedulerState::Running);
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn provide_stamps_provider_and_rejects_duplicates() {
        let server = bound().await;
        assert!(server.can_provide(echo("/echo").description()));

        let handle = server.provide(echo("/echo"), "sys").unwrap();
        let provider = handle.description().provider().unwrap();
        assert_eq!(provider.system_name, "sys");
        assert_eq!(provider.addr, server.local_addr());

        assert!(!server.can_provide(echo("/echo").description()));
        let err = server.provide(echo("/echo"), "sys").unwrap_err();
        assert_eq!(err.kind(), arkalix_core::FaultKind::Custom("service"));

        assert!(handle.dismiss());
        assert!(server.can_provide(echo("/echo").description()));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_refuses_services() {
        let server = bound().await;
        server.provide(echo("/echo"), "sys").unwrap();

        let first = server.close();
        let second = server.close();
        first.into_async().await.unwrap();
        second.into_async().await.unwrap();

        assert_eq!(server.state(), SchedulerState::Shutdown);
        assert!(server.provided_services().is_empty());
        assert!(matches!(
            server.provide(echo("/other"), "sys"),
            Err(Fault::ShuttingDown)
        ));
        assert!(!server.can_provide(echo("/other").description()));
    }

    #[tokio::test]
    async fn bind_on_shut_down_scheduler_fails() {
        let scheduler = RuntimeScheduler::from_handle(Handle::current());
        drop(scheduler.shutdown(Duration::ZERO));
        let outcome = ServiceServer::bind(
            &scheduler,
            loopback(),
            ConnectionConfig::default(),
            Duration::ZERO,
        )
        .into_async()
        .await;
        assert!(matches!(outcome, Err(Fault::Scheduler(_))));
    }

    #[test]
    fn handler_failure_becomes_500() {
        let frame = response_frame(Err(Fault::msg("boom")));
        assert_eq!(frame.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(frame.body.is_empty());
    }
}
