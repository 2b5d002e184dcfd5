//! Systems: named service providers and consumers.
//!
//! A [`System`] owns the servers its provided services run on, a cache of
//! services it consumes, and a listener on its scheduler that shuts the
//! system down when the scheduler does.

pub mod config;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use arkalix_core::{
    default_scheduler, first_fault, serialize, Fault, Future, ListenerId, Scheduler,
    SchedulerError,
};
use parking_lot::Mutex;
use tracing::{error, info};

pub use config::SystemConfig;

use crate::network::{ClientConnection, ConnectionConfig, ServiceServer};
use crate::service::{Service, ServiceCache, ServiceDescription, ServiceHandle};

// ---------------------------------------------------------------------------
// SystemIdentity / SystemError
// ---------------------------------------------------------------------------

/// Identity a secure system proves to its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    system_name: String,
}

impl SystemIdentity {
    #[must_use]
    pub fn new(system_name: impl Into<String>) -> Self {
        Self {
            system_name: system_name.into(),
        }
    }

    #[must_use]
    pub fn system_name(&self) -> &str {
        &self.system_name
    }
}

/// Reasons a [`SystemBuilder`] refuses to build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemError {
    #[error("expected identity; required in secure mode")]
    MissingIdentity,
    #[error("unexpected identity; not permitted in insecure mode")]
    UnexpectedIdentity,
    #[error("expected name; required in insecure mode")]
    MissingName,
    #[error("expected name either not be provided or to match identity name; \"{given}\" != \"{identity}\"")]
    NameMismatch { given: String, identity: String },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

// ---------------------------------------------------------------------------
// SystemBuilder
// ---------------------------------------------------------------------------

/// Builder of [`System`]s. Systems are secure unless
/// [`SystemBuilder::insecure`] is called.
#[derive(Default)]
#[must_use]
pub struct SystemBuilder {
    config: SystemConfig,
    insecure: bool,
    identity: Option<SystemIdentity>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.config.local_addr = local_addr;
        self
    }

    /// Keeps the configured IP address, replacing only the port.
    pub fn local_port(mut self, port: u16) -> Self {
        self.config.local_addr.set_port(port);
        self
    }

    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn identity(mut self, identity: SystemIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Scheduler the system runs on. Defaults to the process default
    /// scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Validates the settings and creates the system.
    ///
    /// # Errors
    ///
    /// In secure mode, fails if no identity is given or if a given name
    /// differs from the identity's. In insecure mode, fails if an identity is
    /// given or the name is missing. Also fails if no scheduler was given and
    /// the default scheduler cannot be started.
    pub fn build(self) -> Result<System, SystemError> {
        let secure = !self.insecure;
        let name = if secure {
            let identity = self.identity.as_ref().ok_or(SystemError::MissingIdentity)?;
            match &self.config.name {
                Some(given) if given != identity.system_name() => {
                    return Err(SystemError::NameMismatch {
                        given: given.clone(),
                        identity: identity.system_name().to_string(),
                    });
                }
                _ => identity.system_name().to_string(),
            }
        } else {
            if self.identity.is_some() {
                return Err(SystemError::UnexpectedIdentity);
            }
            match &self.config.name {
                Some(name) if !name.is_empty() => name.clone(),
                _ => return Err(SystemError::MissingName),
            }
        };

        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => default_scheduler()?,
        };

        let inner = Arc::new(Inner {
            name,
            secure,
            identity: self.identity,
            local_addr: ArcSwap::from_pointee(self.config.local_addr),
            config: self.config,
            scheduler,
            listener: Mutex::new(None),
            servers: Mutex::new(Vec::new()),
            cache: ServiceCache::new(),
            shutting_down: AtomicBool::new(false),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let id = inner.scheduler.add_shutdown_listener(Arc::new(move |_grace: Duration| {
            if let Some(inner) = weak.upgrade() {
                let name = inner.name.clone();
                System { inner }.shutdown().on_failure(move |fault| {
                    error!(system = %name, %fault, "shutdown triggered by scheduler failed");
                });
            }
        }));
        // A scheduler already shutting down invokes the listener inside
        // add_shutdown_listener; the id is then stale and harmless.
        *inner.listener.lock() = Some(id);

        info!(system = %inner.name, secure, "system created");
        Ok(System { inner })
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

struct Inner {
    name: String,
    secure: bool,
    identity: Option<SystemIdentity>,
    local_addr: ArcSwap<SocketAddr>,
    config: SystemConfig,
    scheduler: Arc<dyn Scheduler>,
    listener: Mutex<Option<ListenerId>>,
    servers: Mutex<Vec<Arc<ServiceServer>>>,
    cache: ServiceCache,
    shutting_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get_mut().take() {
            self.scheduler.remove_shutdown_listener(id);
        }
    }
}

/// A named system providing and consuming services.
///
/// Cloning is cheap; clones share the same servers and state.
#[derive(Clone)]
pub struct System {
    inner: Arc<Inner>,
}

impl System {
    pub fn builder() -> SystemBuilder {
        SystemBuilder::new()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// Identity of a secure system; `None` in insecure mode.
    #[must_use]
    pub fn identity(&self) -> Option<&SystemIdentity> {
        self.inner.identity.as_ref()
    }

    /// Address servers bind to. Once a server is bound with port `0`, this
    /// reports the port the OS assigned.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        **self.inner.local_addr.load()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    /// Local cache of services this system consumes.
    #[must_use]
    pub fn consumed_services(&self) -> &ServiceCache {
        &self.inner.cache
    }

    /// Descriptions of every service this system currently provides.
    #[must_use]
    pub fn provided_services(&self) -> Vec<ServiceDescription> {
        self.inner
            .servers
            .lock()
            .iter()
            .flat_map(|server| server.provided_services())
            .collect()
    }

    /// Starts providing `service`.
    ///
    /// The service is added to an existing server able to provide it, or to
    /// a newly bound one. Fails with [`Fault::ShuttingDown`] if the system is
    /// shutting down, including when shutdown begins while a new server is
    /// being bound.
    pub fn provide(&self, service: Service) -> Future<ServiceHandle> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Future::failure(Fault::ShuttingDown);
        }

        let existing = self
            .inner
            .servers
            .lock()
            .iter()
            .find(|server| server.can_provide(service.description()))
            .cloned();
        if let Some(server) = existing {
            return Future::of(server.provide(service, &self.inner.name));
        }

        let inner = Arc::clone(&self.inner);
        ServiceServer::bind(
            self.inner.scheduler.as_ref(),
            self.local_addr(),
            self.inner.config.connection.clone(),
            self.inner.config.shutdown_grace,
        )
        .flat_map(move |server| {
            {
                let mut servers = inner.servers.lock();
                if !inner.shutting_down.load(Ordering::SeqCst) {
                    inner.local_addr.store(Arc::new(server.local_addr()));
                    servers.push(Arc::clone(&server));
                    drop(servers);
                    return Future::of(server.provide(service, &inner.name));
                }
            }
            server.close().fail(Fault::ShuttingDown)
        })
    }

    /// Opens a client connection to a service provider at `remote_addr`.
    pub fn connect(&self, remote_addr: SocketAddr) -> Future<ClientConnection> {
        if self.is_shutting_down() {
            return Future::failure(Fault::ShuttingDown);
        }
        ClientConnection::connect(
            self.inner.scheduler.as_ref(),
            remote_addr,
            self.inner.config.connection.clone(),
        )
    }

    /// Shuts the system down, closing its servers one at a time.
    ///
    /// Only the first call does anything; later calls resolve immediately.
    /// Resolves with the first fault any server reported while closing.
    pub fn shutdown(&self) -> Future<()> {
        let servers = {
            let servers = self.inner.servers.lock();
            if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
                return Future::done();
            }
            servers.clone()
        };
        if let Some(id) = self.inner.listener.lock().take() {
            self.inner.scheduler.remove_shutdown_listener(id);
        }
        info!(system = %self.inner.name, servers = servers.len(), "system shutting down");

        let inner = Arc::clone(&self.inner);
        serialize(servers.into_iter().map(|server| move || server.close())).map_result(
            move |outcome| {
                inner.servers.lock().clear();
                inner.cache.clear();
                info!(system = %inner.name, "system shut down");
                outcome.and_then(|outcomes| first_fault(&outcomes))
            },
        )
    }

    /// Returns `true` once this system or its scheduler began shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst) || self.inner.scheduler.is_shutting_down()
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.inner.name)
            .field("secure", &self.inner.secure)
            .field("local_addr", &self.local_addr())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
