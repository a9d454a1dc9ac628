//! Secure session over a raw byte stream
//!
//! A [`SecureSession`] turns any `AsyncRead + AsyncWrite` stream into a
//! message channel: every `write` produces exactly one sealed frame and every
//! `read` yields the payload of exactly one frame. The session can be split
//! into a [`SecureReader`] and a [`SecureWriter`] so both directions can be
//! driven from different tasks.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::SecureCodec;
use crate::crypto::{Cipher, SharedKey};
use crate::error::{ProtocolError, TransportError};
use crate::frame::{FrameType, SecureFrame};
use crate::socket::{SocketOptions, SocketTuning};

/// Key material and auth token shared by every session of a mirror
#[derive(Clone)]
pub struct SecureContext {
    cipher: Arc<Cipher>,
    auth_token: Arc<str>,
}

impl SecureContext {
    /// Create a context; a missing token is treated as the empty token
    pub fn new(key: &SharedKey, auth_token: Option<String>) -> Self {
        Self {
            cipher: Arc::new(Cipher::new(key)),
            auth_token: Arc::from(auth_token.unwrap_or_default()),
        }
    }

    /// Codec sealing frames under this context's key
    pub fn codec(&self) -> SecureCodec {
        SecureCodec::new(Arc::clone(&self.cipher))
    }

    /// Token carried by auth frames
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    fn verify_token(&self, presented: &[u8]) -> Result<(), ProtocolError> {
        if presented == self.auth_token.as_bytes() {
            tracing::info!("Auth token accepted");
            Ok(())
        } else {
            tracing::warn!("Auth token rejected");
            Err(ProtocolError::AuthRejected)
        }
    }
}

impl fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureContext")
            .field("auth_token_set", &!self.auth_token.is_empty())
            .finish_non_exhaustive()
    }
}

/// Receiving half of a secure session
pub struct SecureReader<S> {
    stream: SplitStream<Framed<S, SecureCodec>>,
    ctx: SecureContext,
    done: bool,
}

impl<S> SecureReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the next raw frame, `None` at end of stream
    pub async fn next_frame(&mut self) -> Result<Option<SecureFrame>, ProtocolError> {
        if self.done {
            return Ok(None);
        }
        match self.stream.next().await {
            Some(Ok(frame)) => {
                tracing::trace!(
                    "Received {:?} frame ({} bytes)",
                    frame.frame_type,
                    frame.payload.len()
                );
                Ok(Some(frame))
            }
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Read the payload of the next data frame, `None` at end of stream
    ///
    /// Auth frames are not application data: a valid one is consumed and
    /// reading continues, an invalid one ends the reader with
    /// [`ProtocolError::AuthRejected`]. A control frame, a corrupt frame or
    /// a stream cut inside a frame also ends the reader with an error.
    pub async fn read(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let Some(frame) = self.next_frame().await? else {
                return Ok(None);
            };

            if frame.frame_type == FrameType::Auth {
                if let Err(e) = self.ctx.verify_token(&frame.payload) {
                    self.done = true;
                    return Err(e);
                }
                continue;
            }

            let data = frame.into_data();
            if data.is_err() {
                self.done = true;
            }
            return data.map(Some);
        }
    }

    /// Wait for the peer's auth frame and check its token
    pub async fn expect_auth(&mut self, wait: Duration) -> Result<(), ProtocolError> {
        let frame = tokio::time::timeout(wait, self.next_frame())
            .await
            .map_err(|_| ProtocolError::AuthTimeout)??
            .ok_or(ProtocolError::ConnectionClosed)?;

        let result = match frame.frame_type {
            FrameType::Auth => self.ctx.verify_token(&frame.payload),
            other => Err(ProtocolError::UnexpectedMessage(format!(
                "expected auth frame, got {:?}",
                other
            ))),
        };
        if result.is_err() {
            self.done = true;
        }
        result
    }
}

/// Sending half of a secure session
pub struct SecureWriter<S> {
    sink: SplitSink<Framed<S, SecureCodec>, SecureFrame>,
    auth_token: Arc<str>,
    closed: bool,
}

impl<S> SecureWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `data` as exactly one data frame, returning `data.len()`
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        let frame = SecureFrame::data(data)?;
        self.write_frame(frame).await?;
        Ok(data.len())
    }

    /// Send one typed frame, returning its payload length
    pub async fn write_frame(&mut self, frame: SecureFrame) -> Result<usize, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        let len = frame.payload.len();
        tracing::trace!("Sending {:?} frame ({} bytes)", frame.frame_type, len);
        self.sink.send(frame).await?;
        Ok(len)
    }

    /// Send the one-shot auth frame
    pub async fn send_auth(&mut self) -> Result<(), ProtocolError> {
        let frame = SecureFrame::auth(&self.auth_token);
        self.write_frame(frame).await.map(|_| ())
    }

    /// Flush and shut down the write side; later calls are no-ops
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S> AsMut<SecureWriter<S>> for SecureWriter<S> {
    fn as_mut(&mut self) -> &mut SecureWriter<S> {
        self
    }
}

impl<S> AsMut<SecureReader<S>> for SecureReader<S> {
    fn as_mut(&mut self) -> &mut SecureReader<S> {
        self
    }
}

/// An encrypted, framed session owning one byte stream
pub struct SecureSession<S = TcpStream> {
    reader: SecureReader<S>,
    writer: SecureWriter<S>,
    peer_addr: Option<SocketAddr>,
}

impl<S> SecureSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream
    pub fn new(stream: S, ctx: &SecureContext) -> Self {
        let (sink, stream) = Framed::new(stream, ctx.codec()).split();
        Self {
            reader: SecureReader {
                stream,
                ctx: ctx.clone(),
                done: false,
            },
            writer: SecureWriter {
                sink,
                auth_token: Arc::clone(&ctx.auth_token),
                closed: false,
            },
            peer_addr: None,
        }
    }

    /// Apply socket options, then wrap the stream
    pub fn tuned(
        stream: S,
        ctx: &SecureContext,
        options: &SocketOptions,
    ) -> Result<Self, TransportError>
    where
        S: SocketTuning,
    {
        stream.apply(options)?;
        Ok(Self::new(stream, ctx))
    }

    /// Remote address of the underlying socket, if known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Read the payload of the next data frame, `None` at end of stream
    ///
    /// A rejected auth frame closes the session.
    pub async fn read(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let result = self.reader.read().await;
        if result.is_err() {
            let _ = self.close().await;
        }
        result
    }

    /// Send `data` as exactly one frame
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        self.writer.write(data).await
    }

    /// Send one typed frame
    pub async fn write_frame(&mut self, frame: SecureFrame) -> Result<usize, ProtocolError> {
        self.writer.write_frame(frame).await
    }

    /// Send the one-shot auth frame
    pub async fn send_auth(&mut self) -> Result<(), ProtocolError> {
        self.writer.send_auth().await
    }

    /// Wait for the peer's auth frame; any failure closes the session
    pub async fn expect_auth(&mut self, wait: Duration) -> Result<(), ProtocolError> {
        let result = self.reader.expect_auth(wait).await;
        if result.is_err() {
            let _ = self.close().await;
        }
        result
    }

    /// Close the session; safe to call more than once
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.reader.done = true;
        self.writer.close().await
    }

    /// Split into independently owned halves
    pub fn into_split(self) -> (SecureReader<S>, SecureWriter<S>) {
        (self.reader, self.writer)
    }
}

impl SecureSession<TcpStream> {
    /// Tune a TCP stream and wrap it, remembering the peer address
    pub fn tcp(
        stream: TcpStream,
        ctx: &SecureContext,
        options: &SocketOptions,
    ) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        let mut session = Self::tuned(stream, ctx, options)?;
        session.peer_addr = Some(peer_addr);
        Ok(session)
    }
}

impl<S> AsMut<SecureWriter<S>> for SecureSession<S> {
    fn as_mut(&mut self) -> &mut SecureWriter<S> {
        &mut self.writer
    }
}

impl<S> AsMut<SecureReader<S>> for SecureSession<S> {
    fn as_mut(&mut self) -> &mut SecureReader<S> {
        &mut self.reader
    }
}
