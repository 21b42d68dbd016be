//! Direct-recording rendering.
//!
//! Direct recording blocks (TZX ID 0x15) carry sampled levels, not
//! pulse-width-encoded bits: each payload bit directly selects the high or
//! low amplitude for exactly one output sample. The caller overrides the
//! sample rate to the block's own rate beforehand and restores it after.

use super::{Advance, Level, PulseSynth, StopCheck};
use crate::consts::CHUNK_SAMPLES;
use crate::sink::AudioSink;
use crate::Result;

impl PulseSynth {
    /// Render a run of direct-recording bytes, one sample per bit, MSB
    /// first. `used_bits_last` truncates the final byte when `last_chunk`
    /// is set. The synthesizer's level tracks the last emitted bit so the
    /// following silence completes the edge correctly.
    pub fn direct_bits<K: AudioSink, C: StopCheck>(
        &mut self,
        bytes: &[u8],
        used_bits_last: u8,
        last_chunk: bool,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        if bytes.is_empty() {
            return Ok(Advance::Completed);
        }

        let total_bits = if last_chunk {
            (bytes.len() - 1) * 8 + usize::from(used_bits_last.clamp(1, 8))
        } else {
            bytes.len() * 8
        };

        let high = self.config().amp_high;
        let low = self.config().amp_low;
        let mut buffer = [0i16; CHUNK_SAMPLES * 2];
        let mut filled = 0usize;
        let mut bit_count = 0usize;

        'bytes: for &byte in bytes {
            for n in 0..8 {
                if bit_count >= total_bits {
                    break 'bytes;
                }
                let one = byte & (0x80 >> n) != 0;
                let amp = if one { high } else { low };
                buffer[filled * 2] = amp;
                buffer[filled * 2 + 1] = amp;
                filled += 1;
                bit_count += 1;
                self.set_level(if one { Level::High } else { Level::Low });

                if filled == CHUNK_SAMPLES {
                    sink.write(&buffer[..filled * 2])?;
                    filled = 0;
                    if ctrl.interrupt_requested() {
                        return Ok(Advance::Interrupted);
                    }
                }
            }
        }

        if filled > 0 {
            sink.write(&buffer[..filled * 2])?;
        }
        Ok(Advance::Completed)
    }
}
