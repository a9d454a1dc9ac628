//! Protocol error types

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while sealing or opening frames
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The operating system random source failed
    #[error("Random source unavailable")]
    RandomSource,

    /// Sealing failed
    #[error("Failed to seal frame")]
    Seal,

    /// Opening failed: the frame was corrupted or sealed under another key
    #[error("Frame authentication failed")]
    Authentication,
}

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Declared ciphertext length below the minimum
    #[error("Invalid frame length: {len} bytes (minimum {min})")]
    InvalidLength { len: usize, min: usize },

    /// Declared or produced frame exceeds the maximum size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Unknown frame type
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Decrypted frame carried no type byte
    #[error("Empty frame")]
    EmptyFrame,

    /// Sealing or opening failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Control payload could not be parsed
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Well-formed message of the wrong kind
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Peer presented a wrong auth token
    #[error("Auth token rejected")]
    AuthRejected,

    /// Peer did not authenticate in time
    #[error("Timed out waiting for auth frame")]
    AuthTimeout,

    /// Peer closed the connection before a complete message arrived
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Session was already closed locally
    #[error("Session closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Socket-level failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Outbound connection failed
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener failed to accept
    #[error("Failed to accept on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Operation needs a connection-oriented byte stream
    #[error("Not supported on this transport: {0}")]
    NotSupported(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
