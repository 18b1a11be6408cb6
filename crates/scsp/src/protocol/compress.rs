//! Inline payload decompression.
//!
//! A compressed frame wraps another frame:
//!
//! ```text
//! %TLEN CLEN ULEN <header bytes><CLEN bytes of LZ4 block data>
//! ```
//!
//! The header bytes are a cleartext prefix (typically a row-set signature)
//! and everything after them is one LZ4 block that inflates to exactly ULEN
//! bytes. The output is `header ++ inflated`, which is itself a frame.

use scsp_core::error::{Error, ProtocolError, ProtocolErrorKind, Result};

use crate::protocol::FrameReader;

/// Upper bound of the LZ4 block format's compression ratio.
const MAX_LZ4_RATIO: usize = 255;

/// Inflate a `%` frame into the frame it wraps.
pub fn decompress(buf: &[u8]) -> Result<Vec<u8>> {
    let mut reader = FrameReader::new(buf, 1);
    let total = read_len(&mut reader, "total length")?;
    let frame_start = reader.position();
    let compressed_len = read_len(&mut reader, "compressed size")?;
    let uncompressed_len = read_len(&mut reader, "uncompressed size")?;
    let body_start = reader.position();

    let frame_end = frame_start
        .checked_add(total)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| Error::malformed("compressed frame is shorter than its declared length"))?;
    let compressed_start = frame_end
        .checked_sub(compressed_len)
        .filter(|start| *start >= body_start)
        .ok_or_else(|| {
            Error::malformed("compressed size exceeds the body of the compressed frame")
        })?;

    if uncompressed_len > compressed_len.saturating_mul(MAX_LZ4_RATIO).saturating_add(16) {
        return Err(compression_error(format!(
            "declared uncompressed size {} is impossible for {} compressed bytes",
            uncompressed_len, compressed_len
        )));
    }

    let header = &buf[body_start..compressed_start];
    let inflated =
        lz4_flex::block::decompress(&buf[compressed_start..frame_end], uncompressed_len)
            .map_err(|e| {
                let mut err = ProtocolError::new(
                    ProtocolErrorKind::Compression,
                    format!("failed to decompress payload: {}", e),
                );
                err.source = Some(Box::new(e));
                Error::Protocol(err)
            })?;

    if inflated.len() != uncompressed_len {
        return Err(compression_error(format!(
            "decompressed {} bytes, expected {}",
            inflated.len(),
            uncompressed_len
        )));
    }

    let mut out = Vec::with_capacity(header.len() + inflated.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&inflated);
    Ok(out)
}

fn read_len(reader: &mut FrameReader<'_>, field: &str) -> Result<usize> {
    reader
        .read_number()
        .and_then(|n| usize::try_from(n.value).ok())
        .ok_or_else(|| Error::malformed(format!("compressed frame is missing its {}", field)))
}

fn compression_error(message: String) -> Error {
    Error::Protocol(ProtocolError::new(ProtocolErrorKind::Compression, message))
}
