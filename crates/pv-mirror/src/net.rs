//! Dialing, binding and socket tuning

use std::net::SocketAddr;

use pv_core::config::BackoffConfig;
use pv_core::PivotError;
use pv_protocol::{SocketOptions, SocketTuning, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::backoff::ExponentialBackoff;

/// Connect to `addr` and tune the socket
pub async fn dial(addr: &str, options: &SocketOptions) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?;
    stream.apply(options)?;
    Ok(stream)
}

/// Bind a listener on `addr`
pub async fn bind(addr: &str) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Tune an accepted socket; a failure is logged and the socket kept
pub fn tune_accepted(stream: &TcpStream, peer: SocketAddr, options: &SocketOptions) {
    if let Err(e) = stream.apply(options) {
        tracing::warn!("Failed to tune socket from {}: {}", peer, e);
    }
}

/// Dial with exponential backoff until connected, out of attempts or cancelled
///
/// Returns `Ok(None)` when cancelled.
pub async fn dial_with_backoff(
    addr: &str,
    options: &SocketOptions,
    backoff: &BackoffConfig,
    cancel: &CancellationToken,
) -> Result<Option<TcpStream>, PivotError> {
    let mut backoff = ExponentialBackoff::from_config(backoff);

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = dial(addr, options) => result,
        };

        match attempt {
            Ok(stream) => return Ok(Some(stream)),
            Err(e) => {
                let Some(delay) = backoff.next_delay() else {
                    tracing::error!("Giving up on {}: {}", addr, e);
                    return Err(PivotError::CommandLinkFailed {
                        addr: addr.to_string(),
                        attempts: backoff.attempts(),
                    });
                };
                tracing::warn!("Dial {} failed ({}), retrying in {:?}", addr, e, delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
