//! System configuration types.

use std::net::SocketAddr;
use std::time::Duration;

use crate::network::ConnectionConfig;

/// Settings of one [`System`](super::System).
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// System name. Required unless taken from the system's identity.
    pub name: Option<String>,
    /// Address the system's servers bind to. Port `0` lets the OS pick.
    pub local_addr: SocketAddr,
    /// How long closing servers wait for outstanding responses.
    pub shutdown_grace: Duration,
    /// Settings shared by every connection the system opens or accepts.
    pub connection: ConnectionConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: None,
            local_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            shutdown_grace: Duration::from_secs(5),
            connection: ConnectionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_config_defaults() {
        let config = SystemConfig::default();
        assert!(config.name.is_none());
        assert_eq!(config.local_addr.port(), 0);
        assert!(config.local_addr.ip().is_unspecified());
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }
}
