//! WAV file export.
//!
//! [`WavSink`] adapts a `hound` writer to the [`AudioSink`] seam so a tape
//! renders straight to disk in streamed chunks. A direct-recording block
//! changing the sample rate mid-tape cannot be represented in a single WAV
//! file; the sink resamples nothing and instead keeps the declared rate,
//! so such tapes should be rendered through a real-time sink instead.

use crate::player::Player;
use crate::sink::AudioSink;
use crate::storage::TapeSource;
use crate::{Result, TapeError};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Audio sink writing 16-bit stereo WAV.
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
    declared_rate: u32,
}

impl WavSink {
    /// Create a WAV file at the given sample rate.
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| TapeError::Other(format!("Failed to create WAV file: {}", e)))?;
        Ok(WavSink {
            writer,
            declared_rate: sample_rate,
        })
    }

    /// Finish the file, flushing the header.
    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| TapeError::Other(format!("Failed to finalize WAV file: {}", e)))
    }
}

impl AudioSink for WavSink {
    fn set_sample_rate(&mut self, rate: u32) {
        if rate != self.declared_rate {
            log::warn!(
                "WAV sink keeps {} Hz; rate change to {} Hz not representable",
                self.declared_rate,
                rate
            );
        }
    }

    fn write(&mut self, interleaved: &[i16]) -> Result<()> {
        for &sample in interleaved {
            self.writer
                .write_sample(sample)
                .map_err(|e| TapeError::Other(format!("Failed to write sample: {}", e)))?;
        }
        Ok(())
    }
}

/// Render a whole tape into a WAV file.
///
/// Plays from the player's current block to the end of the container (or
/// the first stop request) and finalizes the file.
pub fn export_to_wav<S: TapeSource, P: AsRef<Path>>(
    player: &mut Player<S>,
    path: P,
) -> Result<()> {
    let sample_rate = crate::consts::DEFAULT_SAMPLE_RATE;
    let mut sink = WavSink::create(path.as_ref(), sample_rate)?;

    log::info!(
        "rendering {} blocks to {}",
        player.tape().num_blocks(),
        path.as_ref().display()
    );
    player.play(&mut sink)?;
    sink.finalize()
}
