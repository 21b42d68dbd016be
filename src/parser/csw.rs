//! CSW recording (TZX ID 0x18) payload handling.
//!
//! The payload is a run-length list of pulse durations expressed in CSW
//! sample periods, optionally deflated (the "Z-RLE" scheme, a zlib stream
//! around the same RLE data). If inflating fails with a data error the
//! payload is reinterpreted as plain RLE instead of failing the block.

use crate::{Result, TapeError};
use compression::prelude::*;

/// Cap on an inflated CSW payload. Tape-length pulse streams stay far
/// below this; anything larger is a corrupt file or a decompression bomb.
const MAX_INFLATED_BYTES: usize = 64 * 1024 * 1024;

/// One run of equal pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CswPulse {
    /// Pulse duration in CSW sample periods.
    pub len: u32,
    /// Consecutive repetitions of the pulse.
    pub repeat: u32,
}

/// Inflate a Z-RLE payload to its RLE byte stream.
pub fn inflate_zrle(data: &[u8]) -> Result<Vec<u8>> {
    let inflated = data
        .iter()
        .copied()
        .decode(&mut ZlibDecoder::new())
        .take(MAX_INFLATED_BYTES + 1)
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|e| TapeError::Decompression(format!("zlib inflate failed: {}", e)))?;

    if inflated.len() > MAX_INFLATED_BYTES {
        return Err(TapeError::Decompression(format!(
            "inflated CSW payload of {} bytes exceeds the safety limit",
            inflated.len()
        )));
    }
    Ok(inflated)
}

/// Parse an RLE byte stream into pulse runs.
///
/// A plain byte is a pulse of that many sample periods; a zero byte is
/// followed by a repeat count for the previous pulse length.
pub fn parse_rle(data: &[u8]) -> Vec<CswPulse> {
    let mut pulses = Vec::new();
    let mut last_len = 0u32;
    let mut i = 0usize;

    while i < data.len() {
        let value = data[i];
        if value == 0 {
            if i + 1 >= data.len() {
                break;
            }
            let repeat = u32::from(data[i + 1]);
            pulses.push(CswPulse {
                len: last_len,
                repeat,
            });
            i += 2;
        } else {
            last_len = u32::from(value);
            pulses.push(CswPulse {
                len: last_len,
                repeat: 1,
            });
            i += 1;
        }
    }
    pulses
}

/// Decode a CSW payload into pulse runs, applying the Z-RLE fallback.
///
/// `compression_type` 1 is plain RLE, 2 is Z-RLE. A zlib data error on a
/// type-2 payload falls back to reading the bytes as plain RLE, keeping
/// the block playable.
pub fn decode_payload(payload: &[u8], compression_type: u8) -> Result<Vec<CswPulse>> {
    match compression_type {
        1 => Ok(parse_rle(payload)),
        2 => match inflate_zrle(payload) {
            Ok(inflated) => Ok(parse_rle(&inflated)),
            Err(TapeError::Decompression(msg)) => {
                log::warn!("CSW Z-RLE inflate failed ({}), falling back to RLE", msg);
                Ok(parse_rle(payload))
            }
            Err(e) => Err(e),
        },
        other => Err(TapeError::Decompression(format!(
            "unsupported CSW compression type {}",
            other
        ))),
    }
}
