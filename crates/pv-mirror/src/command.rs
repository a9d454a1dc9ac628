//! Command link handler
//!
//! Runs on the mirror that dialed endpoint A. Every control message read
//! from the command link is a request to dial back to the other mirror on
//! the advertised port; the new socket joins endpoint A's queue like any
//! other inbound client.

use std::net::{IpAddr, SocketAddr};

use pv_core::PivotError;
use pv_protocol::{receive_control_message, ProtocolError, SecureReader, SocketOptions};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::endpoint::Inbound;
use crate::net;

/// Turns control messages into dialed leg A sockets
pub struct CommandHandler {
    /// Mirror name for logs
    mirror: String,
    /// Address of the command link's remote end; dial-backs go there
    peer_ip: IpAddr,
    /// Options for dialed sockets
    options: SocketOptions,
    /// Endpoint A queue
    queue: mpsc::Sender<Inbound>,
}

impl CommandHandler {
    /// Create a handler
    pub fn new(
        mirror: impl Into<String>,
        peer_ip: IpAddr,
        options: SocketOptions,
        queue: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            mirror: mirror.into(),
            peer_ip,
            options,
            queue,
        }
    }

    /// Serve the command link until it closes or a step fails
    pub async fn run(self, mut reader: SecureReader<TcpStream>) -> Result<(), PivotError> {
        tracing::info!(mirror = %self.mirror, "Command handler started");

        loop {
            let msg = match receive_control_message(&mut reader).await {
                Ok(msg) => msg,
                Err(ProtocolError::ConnectionClosed) => {
                    tracing::info!(mirror = %self.mirror, "Command link closed");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let target = SocketAddr::new(self.peer_ip, msg.port);
            tracing::debug!(mirror = %self.mirror, "Dial-back requested to {}", target);

            let stream = net::dial(&target.to_string(), &self.options).await?;
            if self
                .queue
                .send(Inbound {
                    stream,
                    peer: target,
                })
                .await
                .is_err()
            {
                tracing::debug!(mirror = %self.mirror, "Endpoint A queue closed");
                return Ok(());
            }
        }
    }
}
