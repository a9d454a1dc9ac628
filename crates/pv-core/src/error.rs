//! Core error types for pivot mirrors

use pv_protocol::{ProtocolError, TransportError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a mirror
#[derive(Error, Debug)]
pub enum PivotError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pivot needed the B peer but none is connected
    #[error("No B peer connected")]
    NoBPeer,

    /// The peer never dialed the advertised port
    #[error("Rendezvous on port {port} timed out after {after:?}")]
    RendezvousTimeout { port: u16, after: std::time::Duration },

    /// A control message to the B peer did not drain in time
    #[error("Control message to B peer stalled for {after:?}")]
    ControlTimeout { after: std::time::Duration },

    /// The command link could not be dialed
    #[error("Command link to {addr} failed after {attempts} attempts")]
    CommandLinkFailed { addr: String, attempts: u32 },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Shared key has the wrong size
    #[error("Shared key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Endpoint address is neither a port nor host:port
    #[error("Invalid endpoint '{address}': {reason}")]
    InvalidEndpoint { address: String, reason: String },

    /// Only TCP is implemented
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_pivot_error() {
        let err: PivotError = ConfigError::UnsupportedProtocol("udp".to_string()).into();
        assert!(matches!(err, PivotError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Unsupported protocol: udp"
        );
    }

    #[test]
    fn test_key_length_message() {
        let err = ConfigError::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Shared key must be 32 bytes, got 16");
    }
}
