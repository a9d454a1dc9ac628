//! Leg traits
//!
//! One side of a pivot session, seen as a stream of byte chunks. Raw sockets
//! and secure sessions both implement these, so the copy loop is written once.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PivotError;

/// Receiving side of a leg
#[async_trait]
pub trait LegReader: Send {
    /// Next chunk of bytes, `None` once the peer is done sending
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, PivotError>;
}

/// Sending side of a leg
#[async_trait]
pub trait LegWriter: Send {
    /// Write the whole chunk
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), PivotError>;

    /// Shut down the sending side; later calls are no-ops
    async fn close(&mut self) -> Result<(), PivotError>;
}
