//! Service provisioning.
//!
//! 1. **Descriptions** (`description`): name, base path, encodings, access policy
//! 2. **Handlers** (`handler`): request-to-response functions bound to a description
//! 3. **Routing** (`registry`): base path to service lookup for one server
//! 4. **Messages** (`response`): request view and mutable response builder
//! 5. **Consumed services** (`cache`): descriptions a system has discovered

pub mod cache;
pub mod description;
pub mod handler;
pub mod registry;
pub mod response;

pub use cache::ServiceCache;
pub use description::{AccessPolicy, Encoding, Provider, ServiceDescription, ServiceError};
pub use handler::{Service, ServiceHandler};
pub use registry::{ServiceHandle, ServiceRouter};
pub use response::{Body, ServiceRequest, ServiceResponse};
