//! Services provided by one server, keyed by base path.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::description::{ServiceDescription, ServiceError};
use super::handler::Service;

// ---------------------------------------------------------------------------
// ServiceRouter
// ---------------------------------------------------------------------------

/// Registry of the services a server currently provides.
///
/// Each base path is owned by at most one service. Requests are routed to
/// the service with the longest base path matching the request path.
#[derive(Debug, Default)]
pub struct ServiceRouter {
    by_base_path: DashMap<String, Arc<Service>>,
}

impl ServiceRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its base path.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::BasePathInUse`] if another service already
    /// owns the base path.
    pub fn register(&self, service: Service) -> Result<Arc<Service>, ServiceError> {
        let base_path = service.description().base_path().to_string();
        match self.by_base_path.entry(base_path) {
            Entry::Occupied(entry) => Err(ServiceError::BasePathInUse(entry.key().clone())),
            Entry::Vacant(entry) => {
                let service = Arc::new(service);
                entry.insert(Arc::clone(&service));
                Ok(service)
            }
        }
    }

    /// Returns `true` if a service owns exactly `base_path`.
    #[must_use]
    pub fn contains(&self, base_path: &str) -> bool {
        self.by_base_path.contains_key(base_path)
    }

    /// Removes the service owning `base_path`.
    pub fn remove(&self, base_path: &str) -> Option<Arc<Service>> {
        self.by_base_path.remove(base_path).map(|(_, service)| service)
    }

    /// Finds the service responsible for `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Arc<Service>> {
        self.by_base_path
            .iter()
            .filter(|entry| entry.value().description().matches_path(path))
            .max_by_key(|entry| entry.key().len())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the descriptions of all registered services.
    #[must_use]
    pub fn descriptions(&self) -> Vec<ServiceDescription> {
        self.by_base_path
            .iter()
            .map(|entry| entry.value().description().clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_base_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_base_path.is_empty()
    }

    pub fn clear(&self) {
        self.by_base_path.clear();
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle
// ---------------------------------------------------------------------------

/// Handle to a provided service.
///
/// Dropping the handle does not dismiss the service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    description: ServiceDescription,
    router: Weak<ServiceRouter>,
}

impl ServiceHandle {
    pub(crate) fn new(description: ServiceDescription, router: &Arc<ServiceRouter>) -> Self {
        Self {
            description,
            router: Arc::downgrade(router),
        }
    }

    /// Description of the service, as provided by its system.
    #[must_use]
    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    /// Stops providing the service. Requests already being handled finish;
    /// later requests for its base path are answered with `404`.
    ///
    /// Returns `false` if the service was already dismissed or its server is
    /// gone.
    pub fn dismiss(&self) -> bool {
        let Some(router) = self.router.upgrade() else {
            return false;
        };
        let removed = router.remove(self.description.base_path()).is_some();
        if removed {
            debug!(
                service = %self.description.name(),
                base_path = %self.description.base_path(),
                "service dismissed"
            );
        }
        removed
    }
}
