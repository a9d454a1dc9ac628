//! Secure frame layout
//!
//! On the wire every frame is:
//! - length: 4 bytes (u32, big-endian), length of the sealed body
//! - body: nonce (12 bytes) || AEAD(type (1 byte) || payload)
//!
//! The type byte lives inside the sealed body, so it is authenticated
//! together with the payload.

use bytes::Bytes;

use crate::compress;
use crate::crypto::{NONCE_SIZE, TAG_SIZE};
use crate::error::ProtocolError;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest acceptable declared body length: a nonce plus one sealed byte
pub const MIN_FRAME_LEN: usize = NONCE_SIZE + 1;

/// Largest acceptable declared body length (16MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Largest payload that still fits in one frame
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_LEN - NONCE_SIZE - TAG_SIZE - 1;

/// Frame type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Typed control frame
    Control = 0x01,
    /// Application data, stored as-is
    Uncompressed = 0x02,
    /// Application data, zstd-compressed
    Compressed = 0x03,
    /// One-shot auth token
    Auth = 0x04,
}

impl FrameType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Control),
            0x02 => Some(Self::Uncompressed),
            0x03 => Some(Self::Compressed),
            0x04 => Some(Self::Auth),
            _ => None,
        }
    }
}

/// A typed frame before sealing / after opening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    /// Type tag
    pub frame_type: FrameType,
    /// Frame payload, compressed when `frame_type` is `Compressed`
    pub payload: Bytes,
}

impl SecureFrame {
    /// Create a frame with an explicit type
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Build a data frame, compressing when that makes it strictly smaller
    pub fn data(payload: &[u8]) -> Result<Self, ProtocolError> {
        let compressed = compress::compress(payload)?;
        if compressed.len() < payload.len() {
            Ok(Self::new(FrameType::Compressed, compressed))
        } else {
            Ok(Self::new(
                FrameType::Uncompressed,
                Bytes::copy_from_slice(payload),
            ))
        }
    }

    /// Build an auth frame carrying `token`
    pub fn auth(token: &str) -> Self {
        Self::new(FrameType::Auth, Bytes::copy_from_slice(token.as_bytes()))
    }

    /// Recover the application bytes carried by a data frame
    ///
    /// Decompression is chosen by the type tag alone. Control and auth
    /// frames carry no application data.
    pub fn into_data(self) -> Result<Bytes, ProtocolError> {
        match self.frame_type {
            FrameType::Uncompressed => Ok(self.payload),
            FrameType::Compressed => {
                compress::decompress(&self.payload, MAX_PAYLOAD_SIZE).map(Bytes::from)
            }
            FrameType::Control | FrameType::Auth => Err(ProtocolError::UnexpectedMessage(
                format!("{:?} frame carries no application data", self.frame_type),
            )),
        }
    }

    /// Serialize `type || payload` for sealing
    pub fn to_plaintext(&self) -> Vec<u8> {
        let mut plain = Vec::with_capacity(1 + self.payload.len());
        plain.push(self.frame_type.as_u8());
        plain.extend_from_slice(&self.payload);
        plain
    }

    /// Parse an opened `type || payload` body
    pub fn from_plaintext(plain: Vec<u8>) -> Result<Self, ProtocolError> {
        let plain = Bytes::from(plain);
        let type_byte = *plain.first().ok_or(ProtocolError::EmptyFrame)?;
        let frame_type =
            FrameType::from_u8(type_byte).ok_or(ProtocolError::UnknownFrameType(type_byte))?;
        Ok(Self {
            frame_type,
            payload: plain.slice(1..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_frame_type_roundtrip() {
        for frame_type in [
            FrameType::Control,
            FrameType::Uncompressed,
            FrameType::Compressed,
            FrameType::Auth,
        ] {
            let byte = frame_type.as_u8();
            assert_eq!(FrameType::from_u8(byte), Some(frame_type));
        }
        assert_eq!(FrameType::from_u8(0x00), None);
        assert_eq!(FrameType::from_u8(0x05), None);
    }

    #[test]
    fn test_min_frame_len() {
        assert_eq!(MIN_FRAME_LEN, 13);
    }

    #[test]
    fn test_compressible_payload_is_tagged_compressed() {
        let payload = vec![b'a'; 4096];
        let frame = SecureFrame::data(&payload).unwrap();

        assert_eq!(frame.frame_type, FrameType::Compressed);
        assert!(frame.payload.len() < payload.len());
        assert_eq!(frame.into_data().unwrap().as_ref(), &payload[..]);
    }

    #[test]
    fn test_incompressible_payload_is_tagged_uncompressed() {
        let mut payload = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut payload);
        let frame = SecureFrame::data(&payload).unwrap();

        assert_eq!(frame.frame_type, FrameType::Uncompressed);
        assert_eq!(frame.payload.as_ref(), &payload[..]);
    }

    #[test]
    fn test_empty_payload_is_uncompressed() {
        let frame = SecureFrame::data(&[]).unwrap();
        assert_eq!(frame.frame_type, FrameType::Uncompressed);
        assert!(frame.into_data().unwrap().is_empty());
    }

    #[test]
    fn test_plaintext_roundtrip() {
        let frame = SecureFrame::new(FrameType::Control, &b"{}"[..]);
        let plain = frame.to_plaintext();
        assert_eq!(plain[0], 0x01);
        assert_eq!(SecureFrame::from_plaintext(plain).unwrap(), frame);
    }

    #[test]
    fn test_plaintext_unknown_type() {
        assert!(matches!(
            SecureFrame::from_plaintext(vec![0x7F, 1, 2]),
            Err(ProtocolError::UnknownFrameType(0x7F))
        ));
        assert!(matches!(
            SecureFrame::from_plaintext(vec![]),
            Err(ProtocolError::EmptyFrame)
        ));
    }

    #[test]
    fn test_auth_frame_has_no_data() {
        let frame = SecureFrame::auth("token");
        assert_eq!(frame.payload.as_ref(), b"token");
        assert!(matches!(
            frame.into_data(),
            Err(ProtocolError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_control_frame_is_not_data() {
        let frame = SecureFrame::new(FrameType::Control, &br#"{"type":"control","port":1}"#[..]);
        assert!(matches!(
            frame.into_data(),
            Err(ProtocolError::UnexpectedMessage(_))
        ));
    }
}
