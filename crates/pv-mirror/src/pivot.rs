//! Pivot sessions
//!
//! A pivot session starts from a leg A socket, obtains the matching leg B
//! (dialed directly, or through a port negotiated with the B peer), wraps
//! exactly one of the two in a secure session and copies bytes both ways
//! until either direction ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pv_core::{Endpoint, EndpointRole, LegPair, LegReader, LegWriter, PivotError, SecuredLeg};
use pv_protocol::{SecureContext, SocketOptions, TransportError};
use tokio::net::TcpStream;

use crate::endpoint::Inbound;
use crate::net;
use crate::peer::BPeerSlot;

/// Everything a pivot session needs from its mirror
pub struct PivotContext {
    /// Mirror name for logs
    pub mirror: String,
    /// Where leg B comes from
    pub endpoint_b: Endpoint,
    /// Which leg is encrypted
    pub secured: SecuredLeg,
    /// Key and token
    pub ctx: SecureContext,
    /// Options for dialed and accepted relay sockets
    pub options: SocketOptions,
    /// How long to wait for the peer to dial an advertised port
    pub rendezvous_timeout: Duration,
    /// The other mirror's command link
    pub b_peer: Arc<BPeerSlot>,
}

/// Copy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From leg A to leg B
    AToB,
    /// From leg B to leg A
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "A->B"),
            Direction::BToA => write!(f, "B->A"),
        }
    }
}

/// How a relay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Direction that finished first
    pub finished: Direction,
    /// Bytes it copied
    pub bytes: u64,
}

/// Run one pivot session to completion
pub async fn run_pivot(
    pivot: Arc<PivotContext>,
    id: u64,
    leg_a: Inbound,
) -> Result<RelayOutcome, PivotError> {
    tracing::info!(mirror = %pivot.mirror, session = id, "Pivot session for {}", leg_a.peer);

    let leg_b = connect_leg_b(&pivot).await?;
    tracing::debug!(
        mirror = %pivot.mirror,
        session = id,
        "Legs ready, secured leg {:?}",
        pivot.secured
    );

    let pair = LegPair::new(leg_a.stream, leg_b, pivot.secured, &pivot.ctx);
    let outcome = relay(pair).await?;
    tracing::info!(
        mirror = %pivot.mirror,
        session = id,
        "Session closed after {} finished ({} bytes)",
        outcome.finished,
        outcome.bytes
    );
    Ok(outcome)
}

/// Obtain leg B according to the endpoint's role
async fn connect_leg_b(pivot: &PivotContext) -> Result<TcpStream, PivotError> {
    match pivot.endpoint_b.role {
        EndpointRole::Dialer => {
            Ok(net::dial(&pivot.endpoint_b.address, &pivot.options).await?)
        }
        EndpointRole::Listener => {
            rendezvous(&pivot.b_peer, &pivot.options, pivot.rendezvous_timeout).await
        }
    }
}

/// Negotiate a dial-back connection through the B peer
///
/// The ephemeral port is bound before it is advertised, exactly one control
/// message is sent and exactly one connection is accepted.
pub async fn rendezvous(
    b_peer: &BPeerSlot,
    options: &SocketOptions,
    wait: Duration,
) -> Result<TcpStream, PivotError> {
    if !b_peer.is_connected().await {
        return Err(PivotError::NoBPeer);
    }

    let listener = net::bind("0.0.0.0:0").await?;
    let local = listener.local_addr()?;
    let port = local.port();
    tracing::debug!("Rendezvous port {}", port);

    b_peer.advertise(port).await?;

    let (stream, peer) = tokio::time::timeout(wait, listener.accept())
        .await
        .map_err(|_| PivotError::RendezvousTimeout { port, after: wait })?
        .map_err(|source| TransportError::Accept {
            addr: local,
            source,
        })?;
    tracing::debug!("Rendezvous on port {} accepted {}", port, peer);
    net::tune_accepted(&stream, peer, options);
    Ok(stream)
}

/// Copy chunks from `reader` to `writer` until end of stream
pub async fn pipe<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, PivotError>
where
    R: LegReader + ?Sized,
    W: LegWriter + ?Sized,
{
    let mut total = 0u64;
    while let Some(chunk) = reader.read_chunk().await? {
        writer.write_chunk(&chunk).await?;
        total += chunk.len() as u64;
    }
    Ok(total)
}

/// Run both copy directions until one ends, then close both legs
pub async fn relay(pair: LegPair) -> Result<RelayOutcome, PivotError> {
    let (a, b) = pair.into_legs();
    let (mut a_reader, mut a_writer) = a.into_split();
    let (mut b_reader, mut b_writer) = b.into_split();

    let result = tokio::select! {
        r = pipe(&mut *a_reader, &mut *b_writer) => r.map(|bytes| RelayOutcome {
            finished: Direction::AToB,
            bytes,
        }),
        r = pipe(&mut *b_reader, &mut *a_writer) => r.map(|bytes| RelayOutcome {
            finished: Direction::BToA,
            bytes,
        }),
    };

    let _ = a_writer.close().await;
    let _ = b_writer.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_protocol::{receive_control_message, SecureSession, SharedKey, KEY_SIZE};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ctx() -> SecureContext {
        SecureContext::new(&SharedKey::from_bytes(&[6u8; KEY_SIZE]).unwrap(), None)
    }

    #[tokio::test]
    async fn test_relay_copies_both_ways() {
        let (a, mut a_peer) = duplex(4096);
        let (b, b_peer) = duplex(4096);
        let pair = LegPair::new(a, b, SecuredLeg::EndpointB, &ctx());
        let relay = tokio::spawn(relay(pair));

        let mut secure_peer = SecureSession::new(b_peer, &ctx());

        a_peer.write_all(b"ping").await.unwrap();
        assert_eq!(secure_peer.read().await.unwrap().unwrap().as_ref(), b"ping");

        secure_peer.write(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        a_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // EOF on A ends the relay
        drop(a_peer);
        let outcome = relay.await.unwrap().unwrap();
        assert_eq!(outcome.finished, Direction::AToB);
        assert_eq!(outcome.bytes, 4);
    }

    #[tokio::test]
    async fn test_eof_on_one_side_unblocks_the_other() {
        let (a, a_peer) = duplex(4096);
        let (b, mut b_peer) = duplex(4096);
        let pair = LegPair::new(a, b, SecuredLeg::EndpointA, &ctx());
        let relay = tokio::spawn(relay(pair));

        // B closes while A stays open and silent
        b_peer.shutdown().await.unwrap();
        drop(b_peer);

        let outcome = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.finished, Direction::BToA);
        drop(a_peer);
    }

    #[tokio::test]
    async fn test_corrupt_secure_leg_ends_relay_with_error() {
        let (a, _a_peer) = duplex(4096);
        let (b, mut b_peer) = duplex(4096);
        let pair = LegPair::new(a, b, SecuredLeg::EndpointB, &ctx());
        let relay = tokio::spawn(relay(pair));

        // Declared length below the minimum
        b_peer.write_all(&[0, 0, 0, 1, 0]).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PivotError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_rendezvous_without_peer_binds_nothing() {
        let slot = BPeerSlot::new();
        let result = rendezvous(&slot, &SocketOptions::default(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PivotError::NoBPeer)));
    }

    #[tokio::test]
    async fn test_rendezvous_advertises_once_and_accepts_once() {
        // B peer link between "us" and the other mirror
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (accepted, peer_addr) = accepted.unwrap();
        let mut other_mirror = SecureSession::new(dialed.unwrap(), &ctx());

        let slot = Arc::new(BPeerSlot::new());
        let (_reader, writer) = SecureSession::new(accepted, &ctx()).into_split();
        slot.install(peer_addr, writer).await.unwrap();

        let pending = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                rendezvous(&slot, &SocketOptions::default(), Duration::from_secs(5)).await
            })
        };

        let msg = receive_control_message(&mut other_mirror).await.unwrap();
        let mut dial_back = TcpStream::connect(("127.0.0.1", msg.port)).await.unwrap();
        let mut leg_b = pending.await.unwrap().unwrap();

        dial_back.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        leg_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        // The ephemeral listener is gone after the single accept
        assert!(TcpStream::connect(("127.0.0.1", msg.port)).await.is_err());

        // No second control message was sent
        let next = tokio::time::timeout(Duration::from_millis(100), other_mirror.read()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_rendezvous_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (accepted, peer_addr) = accepted.unwrap();
        let _other_mirror = dialed.unwrap();

        let slot = BPeerSlot::new();
        let (_reader, writer) = SecureSession::new(accepted, &ctx()).into_split();
        slot.install(peer_addr, writer).await.unwrap();

        let result = rendezvous(&slot, &SocketOptions::default(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PivotError::RendezvousTimeout { .. })));
    }
}
