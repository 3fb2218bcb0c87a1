//! Server configuration.

use std::time::Duration;

/// Configuration shared by the protocol core, the feedback bridge, and the
/// HTTP router.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name override advertised in the initialize handshake
    pub name: Option<String>,
    /// How long a feedback request may stay pending before it is rejected
    pub feedback_timeout: Duration,
    /// Keep-alive interval for SSE and streamable HTTP event streams
    pub keepalive_interval: Duration,
    /// Capacity of the feedback event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            feedback_timeout: Duration::from_secs(300),
            keepalive_interval: Duration::from_secs(15),
            event_channel_capacity: 100,
        }
    }
}
