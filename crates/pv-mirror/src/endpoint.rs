//! Listening endpoints
//!
//! Each listening endpoint runs its own accept loop and hands accepted
//! sockets to the dispatch loop through a queue.

use std::net::SocketAddr;

use pv_core::EndpointId;
use pv_protocol::{SocketOptions, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::net;

/// A socket handed from an endpoint to the dispatch loop
#[derive(Debug)]
pub struct Inbound {
    /// The connected socket
    pub stream: TcpStream,
    /// Remote address
    pub peer: SocketAddr,
}

/// Bound listener for one endpoint
pub struct EndpointListener {
    /// Endpoint served
    id: EndpointId,
    /// Mirror name for logs
    mirror: String,
    /// Bound socket
    listener: TcpListener,
    /// Address actually bound
    local_addr: SocketAddr,
    /// Options for accepted sockets
    options: SocketOptions,
}

impl EndpointListener {
    /// Bind the endpoint's listener
    pub async fn bind(
        mirror: &str,
        id: EndpointId,
        addr: &str,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        let listener = net::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(mirror = %mirror, endpoint = %id, "Listening on {}", local_addr);
        Ok(Self {
            id,
            mirror: mirror.to_string(),
            listener,
            local_addr,
            options,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until cancelled, the queue closes or accept fails
    ///
    /// An accept failure cancels `exit` so the owner sees the endpoint died.
    pub async fn run(self, queue: mpsc::Sender<Inbound>, exit: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = exit.cancelled() => {
                    tracing::debug!(mirror = %self.mirror, endpoint = %self.id, "Accept loop exiting");
                    break;
                }
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(mirror = %self.mirror, endpoint = %self.id, "New connection from {}", peer);
                    net::tune_accepted(&stream, peer, &self.options);
                    if queue.send(Inbound { stream, peer }).await.is_err() {
                        tracing::debug!(mirror = %self.mirror, endpoint = %self.id, "Dispatch loop gone");
                        break;
                    }
                }
                Err(source) => {
                    let err = TransportError::Accept {
                        addr: self.local_addr,
                        source,
                    };
                    tracing::error!(mirror = %self.mirror, endpoint = %self.id, "{}", err);
                    exit.cancel();
                    break;
                }
            }
        }
    }
}
