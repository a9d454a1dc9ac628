//! Per-connection socket tuning
//!
//! Tuning only makes sense on a connection-oriented byte stream. Every other
//! transport keeps the default implementations, which report
//! [`TransportError::NotSupported`].

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::DuplexStream;
use tokio::net::TcpStream;

use crate::error::TransportError;

/// Socket options applied to a dialed or accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// TCP keep-alive idle period; `None` disables keep-alive
    pub keepalive: Option<Duration>,
    /// Reset the connection on close instead of lingering
    pub linger_zero: bool,
    /// Receive buffer size in bytes
    pub recv_buffer: Option<usize>,
    /// Send buffer size in bytes
    pub send_buffer: Option<usize>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(3)),
            linger_zero: true,
            recv_buffer: Some(16 * 1024),
            send_buffer: Some(16 * 1024),
        }
    }
}

impl SocketOptions {
    /// Options for relayed sockets
    ///
    /// Linger 0 and the fixed buffer sizes belong to the command link only: a
    /// reset on close would drop whatever the kernel still holds for the
    /// peer, so relay legs close gracefully and keep the OS buffer sizing.
    pub fn for_relay(&self) -> Self {
        Self {
            nodelay: self.nodelay,
            keepalive: self.keepalive,
            linger_zero: false,
            recv_buffer: None,
            send_buffer: None,
        }
    }
}

/// Socket controls for a transport
pub trait SocketTuning {
    /// Enable or disable Nagle's algorithm
    fn set_nodelay(&self, _nodelay: bool) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("no-delay"))
    }

    /// Enable keep-alive with the given period, or disable it
    fn set_keepalive(&self, _period: Option<Duration>) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("keep-alive"))
    }

    /// Drop unsent data and reset on close
    fn set_linger_zero(&self) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("linger"))
    }

    /// Set the receive buffer size
    fn set_recv_buffer(&self, _size: usize) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("receive buffer"))
    }

    /// Set the send buffer size
    fn set_send_buffer(&self, _size: usize) -> Result<(), TransportError> {
        Err(TransportError::NotSupported("send buffer"))
    }

    /// Apply a full option set, stopping at the first failure
    fn apply(&self, options: &SocketOptions) -> Result<(), TransportError> {
        self.set_nodelay(options.nodelay)?;
        self.set_keepalive(options.keepalive)?;
        if options.linger_zero {
            self.set_linger_zero()?;
        }
        if let Some(size) = options.recv_buffer {
            self.set_recv_buffer(size)?;
        }
        if let Some(size) = options.send_buffer {
            self.set_send_buffer(size)?;
        }
        Ok(())
    }
}

impl SocketTuning for TcpStream {
    fn set_nodelay(&self, nodelay: bool) -> Result<(), TransportError> {
        TcpStream::set_nodelay(self, nodelay)?;
        Ok(())
    }

    fn set_keepalive(&self, period: Option<Duration>) -> Result<(), TransportError> {
        let sock = SockRef::from(self);
        match period {
            Some(period) => {
                sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(period))?;
            }
            None => sock.set_keepalive(false)?,
        }
        Ok(())
    }

    fn set_linger_zero(&self) -> Result<(), TransportError> {
        SockRef::from(self).set_linger(Some(Duration::ZERO))?;
        Ok(())
    }

    fn set_recv_buffer(&self, size: usize) -> Result<(), TransportError> {
        SockRef::from(self).set_recv_buffer_size(size)?;
        Ok(())
    }

    fn set_send_buffer(&self, size: usize) -> Result<(), TransportError> {
        SockRef::from(self).set_send_buffer_size(size)?;
        Ok(())
    }
}

// In-memory pipes used by tests and local wiring
impl SocketTuning for DuplexStream {}
