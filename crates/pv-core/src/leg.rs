//! Leg implementations and the pair builder
//!
//! Every pivot session joins two legs. Exactly one of them is wrapped in a
//! secure session; which one is fixed by [`SecuredLeg`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pv_protocol::{SecureContext, SecureReader, SecureSession, SecureWriter};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::PivotError;
use crate::traits::{LegReader, LegWriter};
use crate::types::{EndpointId, SecuredLeg};

/// Read size for raw legs
pub const RAW_CHUNK_SIZE: usize = 32 * 1024;

/// Plain byte stream, reading side
pub struct RawReader<S> {
    inner: ReadHalf<S>,
    buf: BytesMut,
}

/// Plain byte stream, writing side
pub struct RawWriter<S> {
    inner: WriteHalf<S>,
    closed: bool,
}

/// Split a plain stream into leg halves
pub fn raw_split<S>(stream: S) -> (RawReader<S>, RawWriter<S>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (
        RawReader {
            inner: read,
            buf: BytesMut::with_capacity(RAW_CHUNK_SIZE),
        },
        RawWriter {
            inner: write,
            closed: false,
        },
    )
}

#[async_trait]
impl<S> LegReader for RawReader<S>
where
    S: AsyncRead + Send + Unpin,
{
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, PivotError> {
        self.buf.reserve(RAW_CHUNK_SIZE);
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }
}

#[async_trait]
impl<S> LegWriter for RawWriter<S>
where
    S: AsyncWrite + Send + Unpin,
{
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), PivotError> {
        self.inner.write_all(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PivotError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> LegReader for SecureReader<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, PivotError> {
        Ok(self.read().await?)
    }
}

#[async_trait]
impl<S> LegWriter for SecureWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), PivotError> {
        self.write(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PivotError> {
        SecureWriter::close(self).await?;
        Ok(())
    }
}

/// Both halves of one leg
///
/// Legs are only built through [`LegPair::new`], which is what keeps exactly
/// one leg of every pair secured.
pub struct Leg {
    endpoint: EndpointId,
    secured: bool,
    reader: Box<dyn LegReader>,
    writer: Box<dyn LegWriter>,
}

impl Leg {
    fn raw<S>(endpoint: EndpointId, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = raw_split(stream);
        Self {
            endpoint,
            secured: false,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    fn secure<S>(endpoint: EndpointId, stream: S, ctx: &SecureContext) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = SecureSession::new(stream, ctx).into_split();
        Self {
            endpoint,
            secured: true,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Which endpoint the leg belongs to
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Whether the leg is framed and encrypted
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// Inbound and outbound sides
    pub fn into_split(self) -> (Box<dyn LegReader>, Box<dyn LegWriter>) {
        (self.reader, self.writer)
    }
}

/// The two legs of a pivot session
pub struct LegPair {
    a: Leg,
    b: Leg,
}

impl LegPair {
    /// Wrap exactly the leg named by `secured`, leave the other raw
    pub fn new<A, B>(a: A, b: B, secured: SecuredLeg, ctx: &SecureContext) -> Self
    where
        A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        match secured {
            SecuredLeg::EndpointA => Self {
                a: Leg::secure(EndpointId::A, a, ctx),
                b: Leg::raw(EndpointId::B, b),
            },
            SecuredLeg::EndpointB => Self {
                a: Leg::raw(EndpointId::A, a),
                b: Leg::secure(EndpointId::B, b, ctx),
            },
        }
    }

    /// Which leg is secured
    pub fn secured(&self) -> SecuredLeg {
        if self.a.secured {
            SecuredLeg::EndpointA
        } else {
            SecuredLeg::EndpointB
        }
    }

    /// Leg towards endpoint A
    pub fn a(&self) -> &Leg {
        &self.a
    }

    /// Leg towards endpoint B
    pub fn b(&self) -> &Leg {
        &self.b
    }

    /// Take the legs apart, A first
    pub fn into_legs(self) -> (Leg, Leg) {
        (self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_protocol::{SharedKey, KEY_SIZE};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn ctx() -> SecureContext {
        SecureContext::new(&SharedKey::from_bytes(&[9u8; KEY_SIZE]).unwrap(), None)
    }

    #[test]
    fn test_exactly_one_leg_is_secured() {
        for secured in [SecuredLeg::EndpointA, SecuredLeg::EndpointB] {
            let (a, _a_peer) = duplex(64);
            let (b, _b_peer) = duplex(64);
            let pair = LegPair::new(a, b, secured, &ctx());

            assert_ne!(pair.a().is_secured(), pair.b().is_secured());
            assert_eq!(pair.secured(), secured);
            assert_eq!(secured.is_secured(EndpointId::A), pair.a().is_secured());
            assert_eq!(pair.a().endpoint(), EndpointId::A);
            assert_eq!(pair.b().endpoint(), EndpointId::B);
        }
    }

    #[tokio::test]
    async fn test_secured_leg_frames_and_raw_leg_passes_through() {
        let (a, mut a_peer) = duplex(4096);
        let (b, b_peer) = duplex(4096);
        let pair = LegPair::new(a, b, SecuredLeg::EndpointB, &ctx());
        let (leg_a, leg_b) = pair.into_legs();
        let (_a_reader, mut a_writer) = leg_a.into_split();
        let (mut b_reader, mut b_writer) = leg_b.into_split();

        // Raw side: bytes arrive untouched
        a_writer.write_chunk(b"plain").await.unwrap();
        let mut buf = [0u8; 5];
        a_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"plain");

        // Secured side: the peer needs the key to read it
        b_writer.write_chunk(b"sealed").await.unwrap();
        let mut peer = SecureSession::new(b_peer, &ctx());
        assert_eq!(peer.read().await.unwrap().unwrap().as_ref(), b"sealed");

        // And the other way round
        peer.write(b"reply").await.unwrap();
        let chunk = b_reader.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.as_ref(), b"reply");
    }

    #[tokio::test]
    async fn test_raw_reader_reports_eof() {
        let (a, mut a_peer) = duplex(64);
        let (mut reader, _writer) = raw_split(a);

        a_peer.write_all(b"bye").await.unwrap();
        drop(a_peer);

        assert_eq!(reader.read_chunk().await.unwrap().unwrap().as_ref(), b"bye");
        assert!(reader.read_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _a_peer) = duplex(64);
        let (b, _b_peer) = duplex(64);
        let (leg_a, leg_b) = LegPair::new(a, b, SecuredLeg::EndpointA, &ctx()).into_legs();
        let (_, mut a_writer) = leg_a.into_split();
        let (_, mut b_writer) = leg_b.into_split();

        a_writer.close().await.unwrap();
        a_writer.close().await.unwrap();
        b_writer.close().await.unwrap();
        b_writer.close().await.unwrap();
    }
}
