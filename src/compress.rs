//! Brotli compression boundary
//!
//! Both directions are gated behind the `brotli` cargo feature; without
//! it every call reports the codec as unavailable.

use crate::error::Woff2Error;

/// Brotli mode hint: font mode for the table payload, text mode for the
/// XML metadata block.
#[derive(Copy, Clone, Debug)]
pub(crate) enum CompressionMode {
    Font,
    Text,
}

#[cfg(feature = "brotli")]
pub(crate) fn compress(data: &[u8], mode: CompressionMode) -> Result<Vec<u8>, Woff2Error> {
    use brotli::enc::BrotliEncoderParams;
    use brotli::enc::backward_references::BrotliEncoderMode;

    let mut params = BrotliEncoderParams::default();
    params.quality = 11;
    params.mode = match mode {
        CompressionMode::Font => BrotliEncoderMode::BROTLI_MODE_FONT,
        CompressionMode::Text => BrotliEncoderMode::BROTLI_MODE_TEXT,
    };

    let mut compressed = Vec::new();
    let mut input = data;
    brotli::BrotliCompress(&mut input, &mut compressed, &params)
        .map_err(|e| Woff2Error::Environment(format!("brotli compression failed: {e}")))?;
    Ok(compressed)
}

/// Decompress a Brotli stream that must inflate to exactly
/// `expected_size` bytes. Reading is capped just past the expected size
/// so a lying header can't balloon the allocation.
#[cfg(feature = "brotli")]
pub(crate) fn decompress(data: &[u8], expected_size: usize) -> Result<Vec<u8>, Woff2Error> {
    use std::io::Read;

    const DECODER_BUFFER_SIZE: usize = 4096;

    let decompressor = brotli_decompressor::Decompressor::new(data, DECODER_BUFFER_SIZE);
    let mut decompressed = Vec::with_capacity(expected_size);
    decompressor
        .take(expected_size as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|_| Woff2Error::Format("compressed font data is corrupt"))?;
    if decompressed.len() != expected_size {
        return Err(Woff2Error::Consistency(format!(
            "unexpected size for decompressed font data: expected {expected_size}, found {}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

#[cfg(not(feature = "brotli"))]
pub(crate) fn compress(_data: &[u8], _mode: CompressionMode) -> Result<Vec<u8>, Woff2Error> {
    Err(Woff2Error::Environment(
        "woffle was built without the 'brotli' feature".into(),
    ))
}

#[cfg(not(feature = "brotli"))]
pub(crate) fn decompress(_data: &[u8], _expected_size: usize) -> Result<Vec<u8>, Woff2Error> {
    Err(Woff2Error::Environment(
        "woffle was built without the 'brotli' feature".into(),
    ))
}

#[cfg(all(test, feature = "brotli"))]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress() {
        let payload = b"glyf glyf glyf glyf glyf glyf glyf glyf".repeat(20);
        for mode in [CompressionMode::Font, CompressionMode::Text] {
            let compressed = compress(&payload, mode).unwrap();
            assert!(compressed.len() < payload.len());
            let decompressed = decompress(&compressed, payload.len()).unwrap();
            assert_eq!(decompressed, payload);
        }
    }

    #[test]
    fn wrong_expected_size_is_rejected() {
        let compressed = compress(b"abcdef", CompressionMode::Font).unwrap();
        assert!(decompress(&compressed, 5).is_err());
        assert!(decompress(&compressed, 7).is_err());
    }

    #[test]
    fn garbage_stream_is_rejected() {
        assert!(decompress(&[0xde, 0xad, 0xbe, 0xef, 0x00], 100).is_err());
    }
}
