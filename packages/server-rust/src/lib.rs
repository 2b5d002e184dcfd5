//! Arkalix server: systems that provide and consume services over a framed
//! TCP transport, built on the `arkalix-core` future algebra.

pub mod logging;
pub mod network;
pub mod service;
pub mod system;

pub use logging::{init_tracing, LogFormat};
pub use network::{
    ClientConnection, ClientRequest, ClientResponse, ConnectionConfig, ServiceServer,
    TransportError,
};
pub use service::{
    AccessPolicy, Encoding, Service, ServiceCache, ServiceDescription, ServiceError,
    ServiceHandle, ServiceHandler, ServiceRequest, ServiceResponse,
};
pub use system::{System, SystemBuilder, SystemConfig, SystemError, SystemIdentity};
