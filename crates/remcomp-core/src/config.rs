//! Centralized configuration for the remote variable client.
//!
//! Protocol-level constants live on [`ProtocolConfig`]; per-connection
//! settings live on [`ClientConfig`].

use std::time::Duration;

/// Wire protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 50051;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Connection settings for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Kernel host name or address.
    pub host: String,
    /// Kernel port.
    pub port: u16,
    /// Maximum time to establish the TCP connection.
    pub connect_timeout: Duration,
    /// Maximum time to wait for the reply to a single call.
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: ProtocolConfig::DEFAULT_HOST.to_string(),
            port: ProtocolConfig::DEFAULT_PORT,
            connect_timeout: ProtocolConfig::CONNECT_TIMEOUT,
            call_timeout: ProtocolConfig::CALL_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given kernel endpoint with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_standard_kernel_port() {
        let config = ClientConfig::default();
        assert_eq!(config.addr(), "localhost:50051");
        assert_eq!(config.call_timeout, ProtocolConfig::CALL_TIMEOUT);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::new("10.0.0.2", 6000)
            .with_connect_timeout(Duration::from_millis(250))
            .with_call_timeout(Duration::from_secs(2));
        assert_eq!(config.addr(), "10.0.0.2:6000");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.call_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(ProtocolConfig::CONNECT_TIMEOUT > Duration::ZERO);
        assert!(ProtocolConfig::CALL_TIMEOUT >= ProtocolConfig::CONNECT_TIMEOUT);
    }
}
