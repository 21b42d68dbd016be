//! Audio sink seam.
//!
//! The synthesizer writes fixed-size interleaved stereo `i16` buffers into
//! an [`AudioSink`] and never hears back — the sink is fire-and-forget.
//! The crate ships [`MemorySink`] for offline rendering and tests; the WAV
//! and streaming outputs implement the same trait.

use crate::Result;

/// Destination for generated samples.
pub trait AudioSink {
    /// Change the output sample rate. Direct-recording blocks override the
    /// rate for their duration and restore it afterwards.
    fn set_sample_rate(&mut self, rate: u32);

    /// Write one buffer of interleaved stereo samples (left, right, …).
    /// Blocks until the sink has accepted the whole buffer.
    fn write(&mut self, interleaved: &[i16]) -> Result<()>;
}

/// Sink that collects every sample in memory.
#[derive(Debug, Clone)]
pub struct MemorySink {
    /// Current sample rate.
    pub sample_rate: u32,
    /// Interleaved stereo samples written so far.
    pub samples: Vec<i16>,
}

impl MemorySink {
    /// Empty sink at the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        MemorySink {
            sample_rate,
            samples: Vec::new(),
        }
    }

    /// Number of stereo frames written.
    pub fn frames(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    /// Seconds of audio written at the current rate.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

impl AudioSink for MemorySink {
    fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    fn write(&mut self, interleaved: &[i16]) -> Result<()> {
        self.samples.extend_from_slice(interleaved);
        Ok(())
    }
}
