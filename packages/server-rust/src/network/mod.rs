//! Framed TCP transport: wire codec, server and client connections.

pub mod client;
pub mod config;
pub mod connection;
pub mod frame;
pub mod server;

pub use client::{
    ClientConnection, ClientRequest, ClientResponse, ClientResponseError, CLIENT_RESPONSE_FAULT,
};
pub use config::ConnectionConfig;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use frame::{ClientCodec, RequestFrame, ResponseFrame, ServerCodec, TransportError};
pub use server::ServiceServer;
