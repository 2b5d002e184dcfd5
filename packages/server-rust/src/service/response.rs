//! Requests received by a provided service and the responses it builds.

use std::net::SocketAddr;
use std::sync::Arc;

use arkalix_core::ReactorScheduler;
use bytes::Bytes;
use http::StatusCode;

use super::description::Encoding;

// ---------------------------------------------------------------------------
// ServiceRequest
// ---------------------------------------------------------------------------

/// A request routed to a provided service.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    path: String,
    body: Bytes,
    peer_addr: SocketAddr,
    scheduler: Arc<ReactorScheduler>,
}

impl ServiceRequest {
    pub(crate) fn new(
        path: String,
        body: Bytes,
        peer_addr: SocketAddr,
        scheduler: Arc<ReactorScheduler>,
    ) -> Self {
        Self {
            path,
            body,
            peer_addr,
            scheduler,
        }
    }

    /// Full request path, including the service's base path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
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

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Serial scheduler of the connection the request arrived on.
    ///
    /// Work submitted here never runs concurrently with other work of the
    /// same connection.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<ReactorScheduler> {
        &self.scheduler
    }
}

// ---------------------------------------------------------------------------
// ServiceResponse
// ---------------------------------------------------------------------------

/// Response body variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Bytes(Bytes),
    Text(String),
    Encoded { encoding: Encoding, bytes: Bytes },
}

impl Body {
    pub(crate) fn into_parts(self) -> (Option<Encoding>, Bytes) {
        match self {
            Self::Bytes(bytes) => (None, bytes),
            Self::Text(text) => (None, Bytes::from(text)),
            Self::Encoded { encoding, bytes } => (Some(encoding), bytes),
        }
    }
}

/// Mutable response builder handed back by a service handler.
///
/// Every setter returns the builder so calls can be chained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    status: StatusCode,
    body: Option<Body>,
}

impl ServiceResponse {
    /// A `200 OK` response with no body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            body: None,
        }
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body_bytes(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.body = Some(Body::Bytes(bytes.into()));
        self
    }

    pub fn body_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.body = Some(Body::Text(text.into()));
        self
    }

    /// Sets a body already encoded with `encoding`.
    pub fn body_encoded(&mut self, encoding: Encoding, bytes: impl Into<Bytes>) -> &mut Self {
        self.body = Some(Body::Encoded {
            encoding,
            bytes: bytes.into(),
        });
        self
    }

    pub fn clear_body(&mut self) -> &mut Self {
        self.body = None;
        self
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Takes the builder's current state, leaving a default response behind.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Shorthand for a response with `status` and no body.
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        let mut response = Self::new();
        response.status(status);
        response
    }

    pub(crate) fn into_parts(self) -> (StatusCode, Option<Encoding>, Bytes) {
        let (encoding, body) = self.body.map(Body::into_parts).unwrap_or_default();
        (self.status, encoding, body)
    }
}

impl Default for ServiceResponse {
    fn default() -> Self {
        Self::new()
    }
}
