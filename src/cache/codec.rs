//! Compression codec for L2 payloads (§4.5).
//!
//! Compresses only if the result is strictly smaller than the original;
//! otherwise the payload is stored raw and metadata records which.

use serde::{Deserialize, Serialize};

use super::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Json,
    Bytes,
    Text,
}

/// Sidecar metadata record sharing TTL with the entry (§3 "Cache Entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub compressed: bool,
    pub content_type: ContentType,
    pub original_size: usize,
    pub compressed_size: usize,
    pub timestamp: i64,
}

/// Compresses `payload` with LZ4 only if doing so strictly shrinks it.
/// Returns `(bytes_to_store, compressed_flag)`.
pub fn encode(payload: &[u8], threshold: usize, enabled: bool) -> (Vec<u8>, bool) {
    if !enabled || payload.len() < threshold {
        return (payload.to_vec(), false);
    }
    match lz4_compress(payload) {
        Some(compressed) if compressed.len() < payload.len() => (compressed, true),
        _ => (payload.to_vec(), false),
    }
}

pub fn decode(stored: &[u8], compressed: bool) -> Result<Vec<u8>, CacheError> {
    if !compressed {
        return Ok(stored.to_vec());
    }
    lz4_decompress(stored).ok_or(CacheError::CompressionError)
}

fn lz4_compress(data: &[u8]) -> Option<Vec<u8>> {
    use std::io::Write;
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(Vec::new()).ok()?;
    encoder.write_all(data).ok()?;
    let (out, result) = encoder.finish();
    result.ok()?;
    Some(out)
}

fn lz4_decompress(data: &[u8]) -> Option<Vec<u8>> {
    use std::io::Read;
    let mut decoder = lz4::Decoder::new(data).ok()?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_compressed() {
        let payload = vec![b'a'; 4096];
        let (stored, compressed) = encode(&payload, 16, true);
        assert!(compressed);
        let back = decode(&stored, compressed).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn below_threshold_stays_raw() {
        let payload = b"tiny".to_vec();
        let (stored, compressed) = encode(&payload, 16, true);
        assert!(!compressed);
        assert_eq!(stored, payload);
    }

    #[test]
    fn disabled_stays_raw() {
        let payload = vec![b'a'; 4096];
        let (_, compressed) = encode(&payload, 16, false);
        assert!(!compressed);
    }
}
