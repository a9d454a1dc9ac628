//! Mirror configuration

use pv_protocol::SocketOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_secs, option_duration_secs};
use crate::error::ConfigError;
use crate::types::{Endpoint, Protocol, SecuredLeg};

/// Configuration for one mirror instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Instance name, used in logs and as the registry key
    pub name: String,

    /// Transport protocol
    pub protocol: Protocol,

    /// Endpoint A: a port to listen on, or `host:port` to dial as the command link
    pub endpoint_a: String,

    /// Endpoint B: a port to listen on, or the `host:port` target
    pub endpoint_b: String,

    /// Client side of the pair. Secures leg A instead of leg B and
    /// authenticates on the command link.
    pub client: bool,

    /// Capacity of each handoff queue
    pub queue_capacity: usize,

    /// How long a pivot session waits for the peer to dial its ephemeral port
    #[serde(with = "duration_secs")]
    pub rendezvous_timeout: Duration,

    /// How long to wait for a B peer's auth frame
    #[serde(with = "duration_secs")]
    pub auth_timeout: Duration,

    /// How long one control message to the B peer may stall before the
    /// peer is dropped
    #[serde(with = "duration_secs")]
    pub control_write_timeout: Duration,

    /// Socket tuning for the command link; relay sockets take a subset
    pub socket: SocketConfig,

    /// Retry policy for dialing the command link
    pub command_link: BackoffConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            name: "mirror1".to_string(),
            protocol: Protocol::Tcp,
            endpoint_a: "8081".to_string(),
            endpoint_b: "8082".to_string(),
            client: false,
            queue_capacity: 64,
            rendezvous_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            control_write_timeout: Duration::from_secs(10),
            socket: SocketConfig::default(),
            command_link: BackoffConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Build a config for two endpoint addresses
    pub fn new(
        name: impl Into<String>,
        endpoint_a: impl Into<String>,
        endpoint_b: impl Into<String>,
        client: bool,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint_a: endpoint_a.into(),
            endpoint_b: endpoint_b.into(),
            client,
            ..Self::default()
        }
    }

    /// Classify both endpoints
    pub fn endpoints(&self) -> Result<(Endpoint, Endpoint), ConfigError> {
        Ok((
            Endpoint::parse(&self.endpoint_a)?,
            Endpoint::parse(&self.endpoint_b)?,
        ))
    }

    /// Which leg of each pivot session is encrypted
    pub fn secured_leg(&self) -> SecuredLeg {
        SecuredLeg::from_client_flag(self.client)
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("mirror name is empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.rendezvous_timeout.is_zero()
            || self.auth_timeout.is_zero()
            || self.control_write_timeout.is_zero()
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        self.endpoints()?;
        self.command_link.validate()
    }
}

/// Per-socket options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm
    pub nodelay: bool,

    /// Keep-alive period in seconds; absent or 0 disables it
    #[serde(with = "option_duration_secs")]
    pub keepalive: Option<Duration>,

    /// Reset instead of lingering on close. Only the command link and the
    /// B peer honour it; relay sockets always close gracefully.
    pub linger_zero: bool,

    /// Receive buffer size in bytes
    pub recv_buffer: Option<usize>,

    /// Send buffer size in bytes
    pub send_buffer: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        let options = SocketOptions::default();
        Self {
            nodelay: options.nodelay,
            keepalive: options.keepalive,
            linger_zero: options.linger_zero,
            recv_buffer: options.recv_buffer,
            send_buffer: options.send_buffer,
        }
    }
}

impl SocketConfig {
    /// Convert to the options applied by the transport
    pub fn to_options(&self) -> SocketOptions {
        SocketOptions {
            nodelay: self.nodelay,
            keepalive: self.keepalive,
            linger_zero: self.linger_zero,
            recv_buffer: self.recv_buffer,
            send_buffer: self.send_buffer,
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: Some(10),
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "backoff multiplier must be finite and >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "backoff jitter must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EndpointRole;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.protocol, Protocol::Tcp);
        assert!(!config.client);
        assert_eq!(config.rendezvous_timeout, Duration::from_secs(30));
        assert_eq!(config.control_write_timeout, Duration::from_secs(10));

        let socket = config.socket.to_options();
        assert!(socket.nodelay);
        assert_eq!(socket.keepalive, Some(Duration::from_secs(3)));
        assert!(socket.linger_zero);
        assert_eq!(socket.recv_buffer, Some(16 * 1024));
    }

    #[test]
    fn test_default_endpoints_listen() {
        let config = MirrorConfig::default();
        config.validate().unwrap();
        let (a, b) = config.endpoints().unwrap();
        assert!(a.is_listener());
        assert!(b.is_listener());
    }

    #[test]
    fn test_bad_endpoint_fails_validation() {
        let config = MirrorConfig::new("m", "example.com", "22", false);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_endpoints_and_secured_leg() {
        let config = MirrorConfig::new("m1", "127.0.0.1:9000", "22", true);
        config.validate().unwrap();

        let (a, b) = config.endpoints().unwrap();
        assert_eq!(a.role, EndpointRole::Dialer);
        assert_eq!(b.role, EndpointRole::Listener);
        assert_eq!(config.secured_leg(), SecuredLeg::EndpointA);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MirrorConfig::new("m", "1", "2", false);
        config.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = MirrorConfig::new(" ", "1", "2", false);
        assert!(config.validate().is_err());
        config.name = "ok".to_string();
        config.command_link.jitter = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = MirrorConfig::new("m", "1", "2", false);
        config.control_write_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = MirrorConfig::new("m", "1", "2", false);
        config.command_link.multiplier = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.command_link.multiplier = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unsupported_protocol_in_toml() {
        let result: Result<MirrorConfig, _> = toml::from_str(r#"protocol = "udp""#);
        assert!(result.is_err());
    }
}
