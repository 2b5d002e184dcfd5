//! Service handlers and the services pairing them with a description.

use std::net::SocketAddr;
use std::sync::Arc;

use arkalix_core::Future;

use super::description::ServiceDescription;
use super::response::{ServiceRequest, ServiceResponse};

/// Handles requests addressed to one provided service.
///
/// Handlers run on the serial scheduler of the connection the request
/// arrived on and must not block; long work belongs on another scheduler,
/// with the handler returning a pending future.
pub trait ServiceHandler: Send + Sync + 'static {
    fn handle(&self, request: ServiceRequest) -> Future<ServiceResponse>;
}

impl<F> ServiceHandler for F
where
    F: Fn(ServiceRequest) -> Future<ServiceResponse> + Send + Sync + 'static,
{
    fn handle(&self, request: ServiceRequest) -> Future<ServiceResponse> {
        self(request)
    }
}

/// A service ready to be provided: its description plus its handler.
#[derive(Clone)]
pub struct Service {
    description: ServiceDescription,
    handler: Arc<dyn ServiceHandler>,
}

impl Service {
    #[must_use]
    pub fn new(description: ServiceDescription, handler: impl ServiceHandler) -> Self {
        Self {
            description,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ServiceHandler> {
        &self.handler
    }

    pub(crate) fn provided_by(self, system_name: &str, addr: SocketAddr) -> Self {
        Self {
            description: self.description.provided_by(system_name, addr),
            handler: self.handler,
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
