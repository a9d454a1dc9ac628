//! The B peer: the authenticated command link of the other mirror
//!
//! Pivot sessions advertise their ephemeral ports over it. The slot lock only
//! guards bookkeeping and is never held across a socket write. Writes take a
//! separate writer lock, so concurrent advertisements never interleave, and
//! each write is bounded so a peer that stops reading gets dropped instead of
//! wedging every caller. Each installed peer carries a generation so a stale
//! monitor cannot clear its successor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pv_core::PivotError;
use pv_protocol::{send_control_message, SecureReader, SecureWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Bound on one control message write unless configured otherwise
pub const DEFAULT_CONTROL_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type SharedWriter = Arc<Mutex<SecureWriter<TcpStream>>>;

struct Peer {
    generation: u64,
    addr: SocketAddr,
    writer: SharedWriter,
    /// Cancelled when the peer leaves the slot; stops its monitor
    gone: CancellationToken,
}

#[derive(Default)]
struct SlotState {
    current: Option<Peer>,
    next_generation: u64,
    closed: bool,
}

/// Holder for the current B peer
pub struct BPeerSlot {
    state: Mutex<SlotState>,
    write_timeout: Duration,
}

impl Default for BPeerSlot {
    fn default() -> Self {
        Self::with_write_timeout(DEFAULT_CONTROL_WRITE_TIMEOUT)
    }
}

impl BPeerSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty slot whose control writes give up after `write_timeout`
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            write_timeout,
        }
    }

    /// Make `writer` the current peer, closing any previous one
    ///
    /// Returns the new generation, or `None` if the slot is already closed.
    pub async fn install(&self, addr: SocketAddr, writer: SecureWriter<TcpStream>) -> Option<u64> {
        let writer = Arc::new(Mutex::new(writer));

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            self.shut(addr, &writer).await;
            return None;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let previous = state.current.replace(Peer {
            generation,
            addr,
            writer,
            gone: CancellationToken::new(),
        });
        drop(state);

        if let Some(old) = previous {
            tracing::info!("B peer {} replaced by {}", old.addr, addr);
            self.retire(old).await;
        }
        Some(generation)
    }

    /// Forget the peer if it is still generation `generation`
    pub async fn clear(&self, generation: u64) -> bool {
        let peer = {
            let mut state = self.state.lock().await;
            let current = state
                .current
                .as_ref()
                .is_some_and(|peer| peer.generation == generation);
            if !current {
                return false;
            }
            state.current.take()
        };
        if let Some(peer) = peer {
            self.retire(peer).await;
        }
        true
    }

    /// Whether a peer is connected
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    /// Address of the current peer
    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.current.as_ref().map(|p| p.addr)
    }

    /// Ask the peer to dial back on `port`
    ///
    /// A write that fails or does not finish within the write bound drops
    /// the peer.
    pub async fn advertise(&self, port: u16) -> Result<(), PivotError> {
        let (generation, addr, writer) = {
            let state = self.state.lock().await;
            let peer = state.current.as_ref().ok_or(PivotError::NoBPeer)?;
            (peer.generation, peer.addr, Arc::clone(&peer.writer))
        };

        let send = async { send_control_message(&mut *writer.lock().await, port).await };
        let result = match tokio::time::timeout(self.write_timeout, send).await {
            Ok(sent) => sent.map_err(PivotError::from),
            Err(_) => Err(PivotError::ControlTimeout {
                after: self.write_timeout,
            }),
        };

        if let Err(e) = &result {
            tracing::warn!("Control message to B peer {} failed: {}", addr, e);
            self.clear(generation).await;
        }
        result
    }

    /// Close the current peer and refuse new ones
    pub async fn close(&self) {
        let peer = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.current.take()
        };
        if let Some(peer) = peer {
            self.retire(peer).await;
        }
    }

    /// Token that fires once generation `generation` leaves the slot
    async fn departure(&self, generation: u64) -> Option<CancellationToken> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .filter(|peer| peer.generation == generation)
            .map(|peer| peer.gone.clone())
    }

    async fn retire(&self, peer: Peer) {
        peer.gone.cancel();
        self.shut(peer.addr, &peer.writer).await;
    }

    /// Close a writer unless a write is in flight
    ///
    /// An in-flight write is already bounded and drops the writer when it
    /// gives up, which closes the socket once the monitor is gone too.
    async fn shut(&self, addr: SocketAddr, writer: &SharedWriter) {
        let Ok(mut writer) = writer.try_lock() else {
            tracing::debug!("B peer {} busy, leaving it to the pending write", addr);
            return;
        };
        match tokio::time::timeout(self.write_timeout, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Closing B peer {} failed: {}", addr, e),
            Err(_) => tracing::debug!("B peer {} did not close in {:?}", addr, self.write_timeout),
        }
    }
}

/// Read the peer until it goes away, then clear it from the slot
///
/// The peer is not expected to send anything after authenticating; stray
/// frames are logged and dropped. Returns early, without clearing, once the
/// slot has already let go of this generation.
pub async fn watch(
    slot: &BPeerSlot,
    generation: u64,
    addr: SocketAddr,
    mut reader: SecureReader<TcpStream>,
) {
    let Some(gone) = slot.departure(generation).await else {
        return;
    };

    loop {
        let read = tokio::select! {
            _ = gone.cancelled() => {
                tracing::debug!("B peer {} left the slot", addr);
                return;
            }
            read = reader.read() => read,
        };
        match read {
            Ok(Some(data)) => {
                tracing::debug!("Ignoring {} bytes from B peer {}", data.len(), addr);
            }
            Ok(None) => {
                tracing::info!("B peer {} disconnected", addr);
                break;
            }
            Err(e) => {
                tracing::warn!("B peer {} failed: {}", addr, e);
                break;
            }
        }
    }
    slot.clear(generation).await;
}
