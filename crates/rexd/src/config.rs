//! Daemon configuration.

use std::env;
use std::time::Duration;

/// Default address of the heartbeat listener
pub const DEFAULT_HEARTBEAT_ADDR: &str = "0.0.0.0:8080";

/// Default address of the HTTP placeholder listener
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8081";

/// Environment variable overriding the heartbeat address
pub const ADDR_ENV: &str = "REX_ADDR";

/// Period between liveness probes (2 seconds)
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(2);

/// Time a new connection has to send its REGISTER frame (10 seconds)
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write timeout (10 seconds)
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the heartbeat server.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address the heartbeat listener binds to.
    pub listen_addr: String,

    /// Per-connection timing.
    pub session: SessionConfig,
}

impl DaemonConfig {
    /// Default configuration, with the listen address taken from
    /// `REX_ADDR` when set.
    pub fn from_env() -> Self {
        let listen_addr =
            env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_HEARTBEAT_ADDR.to_string());
        Self {
            listen_addr,
            ..Default::default()
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_HEARTBEAT_ADDR.to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Timing knobs for one connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Period between PING frames.
    pub ping_interval: Duration,

    /// Deadline for the first frame of a new connection.
    pub handshake_timeout: Duration,

    /// Deadline for a single frame write.
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.session.ping_interval, Duration::from_secs(2));
        assert!(config.session.handshake_timeout > config.session.ping_interval);
    }
}
