//! Tokio codec for sealed, length-prefixed frames

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::crypto::{Cipher, SharedKey};
use crate::error::ProtocolError;
use crate::frame::{
    SecureFrame, LENGTH_PREFIX_SIZE, MAX_FRAME_LEN, MAX_PAYLOAD_SIZE, MIN_FRAME_LEN,
};

/// Codec for encoding/decoding secure frames
#[derive(Debug, Clone)]
pub struct SecureCodec {
    /// Shared cipher
    cipher: Arc<Cipher>,
    /// Body length of a frame whose prefix was already consumed
    pending_len: Option<usize>,
}

impl SecureCodec {
    /// Create a codec around a shared cipher
    pub fn new(cipher: Arc<Cipher>) -> Self {
        Self {
            cipher,
            pending_len: None,
        }
    }

    /// Create a codec for a key
    pub fn from_key(key: &SharedKey) -> Self {
        Self::new(Arc::new(Cipher::new(key)))
    }
}

impl Decoder for SecureCodec {
    type Item = SecureFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let body_len = match self.pending_len.take() {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None); // Need more data
                }
                let len = src.get_u32() as usize;
                if len < MIN_FRAME_LEN {
                    return Err(ProtocolError::InvalidLength {
                        len,
                        min: MIN_FRAME_LEN,
                    });
                }
                if len > MAX_FRAME_LEN {
                    return Err(ProtocolError::FrameTooLarge {
                        size: len,
                        max: MAX_FRAME_LEN,
                    });
                }
                len
            }
        };

        if src.len() < body_len {
            // Save length and wait for more data
            src.reserve(body_len - src.len());
            self.pending_len = Some(body_len);
            return Ok(None);
        }

        let body = src.split_to(body_len);
        let plain = self.cipher.open(&body)?;
        SecureFrame::from_plaintext(plain).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Stream ended inside a frame
        if let Some(body_len) = self.pending_len.take() {
            return Err(truncated(format!(
                "stream ended with {} of {} frame bytes",
                src.len(),
                body_len
            )));
        }
        if !src.is_empty() {
            return Err(truncated(format!(
                "stream ended inside a length prefix ({} bytes)",
                src.len()
            )));
        }
        Ok(None)
    }
}

fn truncated(msg: String) -> ProtocolError {
    ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg))
}

impl Encoder<SecureFrame> for SecureCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: SecureFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let sealed = self.cipher.seal(&frame.to_plaintext())?;

        dst.reserve(LENGTH_PREFIX_SIZE + sealed.len());
        dst.put_u32(sealed.len() as u32);
        dst.extend_from_slice(&sealed);

        Ok(())
    }
}

/// Seal a single frame into its wire form
pub fn encode_frame(key: &SharedKey, frame: SecureFrame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    SecureCodec::from_key(key).encode(frame, &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use crate::error::CryptoError;
    use crate::frame::FrameType;
    use rand::RngCore;

    fn key() -> SharedKey {
        SharedKey::from_bytes(&[0x11; KEY_SIZE]).unwrap()
    }

    fn roundtrip(payload: &[u8]) -> (FrameType, Bytes) {
        let mut codec = SecureCodec::from_key(&key());
        let mut buf = BytesMut::new();
        codec
            .encode(SecureFrame::data(payload).unwrap(), &mut buf)
            .unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        (frame.frame_type, frame.into_data().unwrap())
    }

    #[test]
    fn test_roundtrip_empty() {
        let (frame_type, data) = roundtrip(&[]);
        assert_eq!(frame_type, FrameType::Uncompressed);
        assert!(data.is_empty());
    }

    #[test]
    fn test_roundtrip_compressible() {
        let payload = b"ping ".repeat(2000);
        let (frame_type, data) = roundtrip(&payload);
        assert_eq!(frame_type, FrameType::Compressed);
        assert_eq!(data.as_ref(), &payload[..]);
    }

    #[test]
    fn test_roundtrip_large_incompressible() {
        let mut payload = vec![0u8; 1 << 20];
        rand::thread_rng().fill_bytes(&mut payload);
        let (frame_type, data) = roundtrip(&payload);
        assert_eq!(frame_type, FrameType::Uncompressed);
        assert_eq!(data.as_ref(), &payload[..]);
    }

    #[test]
    fn test_wire_layout() {
        let wire = encode_frame(&key(), SecureFrame::auth("tok")).unwrap();
        let declared = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;

        // nonce + type byte + "tok" + tag
        assert_eq!(declared, 12 + 1 + 3 + 16);
        assert_eq!(wire.len(), LENGTH_PREFIX_SIZE + declared);
    }

    #[test]
    fn test_tampering_is_detected_everywhere() {
        let wire = encode_frame(&key(), SecureFrame::data(b"hello mirror").unwrap()).unwrap();

        for index in LENGTH_PREFIX_SIZE..wire.len() {
            let mut tampered = BytesMut::from(&wire[..]);
            tampered[index] ^= 0x01;

            let result = SecureCodec::from_key(&key()).decode(&mut tampered);
            assert!(
                matches!(
                    result,
                    Err(ProtocolError::Crypto(CryptoError::Authentication))
                ),
                "bit flip at byte {} was not detected",
                index
            );
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let wire = encode_frame(&key(), SecureFrame::data(b"secret").unwrap()).unwrap();
        let other = SharedKey::from_bytes(&[0x22; KEY_SIZE]).unwrap();

        let mut buf = BytesMut::from(&wire[..]);
        assert!(matches!(
            SecureCodec::from_key(&other).decode(&mut buf),
            Err(ProtocolError::Crypto(CryptoError::Authentication))
        ));
    }

    #[test]
    fn test_undersized_length_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(12);
        buf.extend_from_slice(&[0u8; 12]);

        assert!(matches!(
            SecureCodec::from_key(&key()).decode(&mut buf),
            Err(ProtocolError::InvalidLength { len: 12, min: 13 })
        ));
    }

    #[test]
    fn test_oversized_length_is_rejected_before_buffering() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);

        assert!(matches!(
            SecureCodec::from_key(&key()).decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_partial_read() {
        let wire = encode_frame(&key(), SecureFrame::data(b"split me").unwrap()).unwrap();
        let mut codec = SecureCodec::from_key(&key());

        // Only part of the length prefix
        let mut partial = BytesMut::from(&wire[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Prefix plus part of the body
        partial.extend_from_slice(&wire[2..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&wire[10..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap().as_ref(), b"split me");
    }

    #[test]
    fn test_eof_after_length_prefix_is_an_error() {
        let mut codec = SecureCodec::from_key(&key());
        let mut buf = BytesMut::from(&[0u8, 0, 0, 64][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(
            matches!(&err, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_eof_inside_length_prefix_is_an_error() {
        let mut codec = SecureCodec::from_key(&key());
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_eof_between_frames_is_clean() {
        let wire = encode_frame(&key(), SecureFrame::data(b"whole").unwrap()).unwrap();
        let mut codec = SecureCodec::from_key(&key());
        let mut buf = BytesMut::from(&wire[..]);

        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap().as_ref(), b"whole");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = SecureCodec::from_key(&key());
        let mut buf = BytesMut::new();
        codec.encode(SecureFrame::data(b"one").unwrap(), &mut buf).unwrap();
        codec.encode(SecureFrame::data(b"two").unwrap(), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.into_data().unwrap().as_ref(), b"one");
        assert_eq!(second.into_data().unwrap().as_ref(), b"two");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
