//! Per-frame zstd compression
//!
//! Each payload is compressed as a standalone zstd frame, so frames never
//! depend on one another and can be decoded in isolation.

use std::io::Read;

use crate::error::ProtocolError;

/// Compress `data` into a single zstd frame at the library's default level
pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    zstd::bulk::compress(data, zstd::DEFAULT_COMPRESSION_LEVEL)
        .map_err(|e| ProtocolError::Compression(format!("zstd compress failed: {e}")))
}

/// Decompress one zstd frame, refusing output larger than `limit`
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| ProtocolError::Compression(format!("zstd decoder init failed: {e}")))?;

    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Compression(format!("zstd read failed: {e}")))?;

    if out.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: out.len(),
            max: limit,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressible_data_shrinks() {
        let data = "GET / HTTP/1.1\r\nHost: example\r\n\r\n".repeat(64);
        let compressed = compress(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, 1 << 20).unwrap(), data.as_bytes());
    }

    #[test]
    fn test_output_is_a_zstd_frame() {
        let compressed = compress(b"hello hello hello hello").unwrap();
        // zstd frame magic number, little-endian 0xFD2FB528
        assert_eq!(&compressed[..4], &[0x28, 0xB5, 0x2F, 0xFD]);
    }

    #[test]
    fn test_empty_input_grows() {
        let compressed = compress(&[]).unwrap();
        assert!(!compressed.is_empty());
        assert!(decompress(&compressed, 16).unwrap().is_empty());
    }

    #[test]
    fn test_decompress_limit() {
        let compressed = compress(&[0u8; 4096]).unwrap();
        assert!(matches!(
            decompress(&compressed, 1024),
            Err(ProtocolError::FrameTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_garbage_is_compression_error() {
        assert!(matches!(
            decompress(b"definitely not zstd", 1024),
            Err(ProtocolError::Compression(_))
        ));
    }
}
