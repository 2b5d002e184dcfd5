//! Transport configuration types.

use std::time::Duration;

/// Per-connection configuration shared by client and server connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest frame accepted or produced, in bytes.
    pub max_frame_length: usize,
    /// Bounded capacity of a client connection's command channel. Requests
    /// issued while it is full fail instead of queueing without limit.
    pub command_channel_capacity: usize,
    /// Maximum time to wait for an outgoing TCP connection to be established.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_length: 8 * 1024 * 1024, // 8 MB
            command_channel_capacity: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
