//! Square-wave pulse synthesis.
//!
//! Everything on a Spectrum tape reduces to runs of half-pulses: hold the
//! output level for some number of T-states, flip it, hold again. The only
//! delicate part is converting T-state durations into whole sample counts
//! without letting the rounding error build up — at 44.1 kHz a standard
//! "0" bit is 10.77 samples, so naive rounding would drift a full second
//! over a long game. [`PulseSynth`] keeps the fractional remainder in an
//! explicit accumulator and folds it into the next pulse.
//!
//! All generation methods write fixed-size interleaved stereo chunks to an
//! [`AudioSink`] and poll a [`StopCheck`] between chunks, so a stop or
//! pause request is honoured within a few hundred samples.

mod direct;

use crate::consts::{self, CHUNK_SAMPLES};
use crate::sink::AudioSink;
use crate::Result;

/// Logical output level of the square wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Low level (the resting state; silence ends here).
    Low,
    /// High level.
    High,
}

impl Level {
    fn toggled(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Polarity rule for the first pulse of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Flip the current level (the normal half-pulse behaviour).
    Toggle,
    /// Keep the current level.
    Same,
    /// Force the low level.
    ForceLow,
    /// Force the high level.
    ForceHigh,
}

impl Polarity {
    /// Decode the two polarity bits of a GDB symbol flag byte.
    pub fn from_flags(flags: u8) -> Polarity {
        match flags & 0x03 {
            0 => Polarity::Toggle,
            1 => Polarity::Same,
            2 => Polarity::ForceLow,
            _ => Polarity::ForceHigh,
        }
    }
}

/// Outcome of a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The requested audio was fully written.
    Completed,
    /// A stop or pause request arrived; generation unwound early.
    Interrupted,
}

impl Advance {
    /// Whether generation ran to completion.
    pub fn completed(self) -> bool {
        self == Advance::Completed
    }
}

/// External stop/pause signal polled between sample chunks.
pub trait StopCheck {
    /// Whether generation should unwind now.
    fn interrupt_requested(&self) -> bool;
}

/// Never interrupts; used for offline rendering and tests.
impl StopCheck for () {
    fn interrupt_requested(&self) -> bool {
        false
    }
}

/// Synthesizer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthConfig {
    /// Output sample rate, Hz.
    pub sample_rate: u32,
    /// CPU clock the T-state durations refer to, Hz.
    pub cpu_hz: u32,
    /// Sample value of the high level.
    pub amp_high: i16,
    /// Sample value of the low level.
    pub amp_low: i16,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: consts::DEFAULT_SAMPLE_RATE,
            cpu_hz: consts::CPU_HZ,
            amp_high: 26_000,
            amp_low: -26_000,
        }
    }
}

/// Cycle-accurate half-pulse generator.
pub struct PulseSynth {
    config: SynthConfig,
    /// samples per T-state at the current output rate
    ratio: f64,
    level: Level,
    /// fractional samples owed to (or borrowed from) the next pulse
    acc: f64,
}

impl PulseSynth {
    /// Synthesizer with the given configuration, starting low.
    pub fn new(config: SynthConfig) -> Self {
        PulseSynth {
            ratio: f64::from(config.sample_rate) / f64::from(config.cpu_hz),
            config,
            level: Level::Low,
            acc: 0.0,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Change the output sample rate (direct-recording blocks override it).
    pub fn set_sample_rate(&mut self, rate: u32) {
        self.config.sample_rate = rate;
        self.ratio = f64::from(rate) / f64::from(self.config.cpu_hz);
    }

    /// Current output level.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Force the output level without emitting samples.
    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    /// Drop any accumulated fractional error.
    ///
    /// Called at block boundaries and before sync pulses and pulse
    /// sequences; the accumulator must never leak across units that do not
    /// share timing continuity.
    pub fn reset_accumulator(&mut self) {
        self.acc = 0.0;
    }

    fn amp(&self, level: Level) -> i16 {
        match level {
            Level::High => self.config.amp_high,
            Level::Low => self.config.amp_low,
        }
    }

    /// Write `samples` frames of `level`, chunked, polling for interrupts.
    fn emit<K: AudioSink, C: StopCheck>(
        &mut self,
        samples: u64,
        level: Level,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        let amp = self.amp(level);
        let mut remaining = samples;
        // Interleaved stereo: same signal on both channels
        let frame = [amp; CHUNK_SAMPLES * 2];

        while remaining > 0 {
            if ctrl.interrupt_requested() {
                return Ok(Advance::Interrupted);
            }
            let n = remaining.min(CHUNK_SAMPLES as u64) as usize;
            sink.write(&frame[..n * 2])?;
            remaining -= n as u64;
        }
        Ok(Advance::Completed)
    }

    /// Convert a T-state duration to a sample count, carrying the error.
    fn pulse_samples(&mut self, tstates: u32) -> u64 {
        let exact = f64::from(tstates) * self.ratio + self.acc;
        let rounded = exact.round();
        self.acc = exact - rounded;
        if rounded <= 0.0 {
            0
        } else {
            rounded as u64
        }
    }

    /// One half-pulse: flip the level, hold it for `tstates`.
    pub fn half_pulse<K: AudioSink, C: StopCheck>(
        &mut self,
        tstates: u32,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        self.half_pulse_with(tstates, Polarity::Toggle, sink, ctrl)
    }

    /// One half-pulse with an explicit polarity rule for its level.
    pub fn half_pulse_with<K: AudioSink, C: StopCheck>(
        &mut self,
        tstates: u32,
        polarity: Polarity,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        match polarity {
            Polarity::Toggle => self.level = self.level.toggled(),
            Polarity::Same => {}
            Polarity::ForceLow => self.level = Level::Low,
            Polarity::ForceHigh => self.level = Level::High,
        }
        let samples = self.pulse_samples(tstates);
        self.emit(samples, self.level, sink, ctrl)
    }

    /// Pilot tone: `count` half-pulses of `len` T-states.
    ///
    /// The accumulator carries across the run so the tone stays on pitch.
    pub fn pilot_tone<K: AudioSink, C: StopCheck>(
        &mut self,
        len: u16,
        count: u16,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        for _ in 0..count {
            if !self.half_pulse(u32::from(len), sink, ctrl)?.completed() {
                return Ok(Advance::Interrupted);
            }
        }
        Ok(Advance::Completed)
    }

    /// Pure tone (ID 0x12): like a pilot, but each pulse stands alone.
    pub fn pure_tone<K: AudioSink, C: StopCheck>(
        &mut self,
        len: u16,
        count: u16,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        for _ in 0..count {
            self.reset_accumulator();
            if !self.half_pulse(u32::from(len), sink, ctrl)?.completed() {
                return Ok(Advance::Interrupted);
            }
        }
        Ok(Advance::Completed)
    }

    /// A sync pulse. Sync marks a timing boundary: the accumulator resets.
    pub fn sync<K: AudioSink, C: StopCheck>(
        &mut self,
        tstates: u16,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        self.reset_accumulator();
        self.half_pulse(u32::from(tstates), sink, ctrl)
    }

    /// An explicit list of half-pulse lengths (ID 0x13 and friends).
    pub fn pulse_sequence<K: AudioSink, C: StopCheck>(
        &mut self,
        pulses: &[u16],
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        for &len in pulses {
            self.reset_accumulator();
            if !self.half_pulse(u32::from(len), sink, ctrl)?.completed() {
                return Ok(Advance::Interrupted);
            }
        }
        Ok(Advance::Completed)
    }

    /// One data bit: two equal half-pulses.
    pub fn bit<K: AudioSink, C: StopCheck>(
        &mut self,
        one: bool,
        bit0: u16,
        bit1: u16,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        let len = u32::from(if one { bit1 } else { bit0 });
        if !self.half_pulse(len, sink, ctrl)?.completed() {
            return Ok(Advance::Interrupted);
        }
        self.half_pulse(len, sink, ctrl)
    }

    /// Bit-encode a run of bytes, MSB first.
    ///
    /// `used_bits_last` (1–8) truncates the final byte, and only applies
    /// when `last_chunk` marks this run as the end of the block's data;
    /// middle partitions of a split block always send whole bytes.
    pub fn data_bytes<K: AudioSink, C: StopCheck>(
        &mut self,
        bytes: &[u8],
        bit0: u16,
        bit1: u16,
        used_bits_last: u8,
        last_chunk: bool,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        for (i, &byte) in bytes.iter().enumerate() {
            if ctrl.interrupt_requested() {
                return Ok(Advance::Interrupted);
            }
            let bits = if last_chunk && i == bytes.len() - 1 {
                used_bits_last.clamp(1, 8)
            } else {
                8
            };
            for n in 0..bits {
                let one = byte & (0x80 >> n) != 0;
                if !self.bit(one, bit0, bit1, sink, ctrl)?.completed() {
                    return Ok(Advance::Interrupted);
                }
            }
        }
        Ok(Advance::Completed)
    }

    /// Silence for `ms` milliseconds.
    ///
    /// One millisecond of the opposite level first, so the final data edge
    /// registers, then the rest at the low level. Always ends low.
    pub fn silence_ms<K: AudioSink, C: StopCheck>(
        &mut self,
        ms: u32,
        sink: &mut K,
        ctrl: &C,
    ) -> Result<Advance> {
        self.reset_accumulator();
        if ms == 0 {
            return Ok(Advance::Completed);
        }

        let rate = f64::from(self.config.sample_rate);
        let total = (f64::from(ms) / 1000.0 * rate).round() as u64;
        let edge = ((rate / 1000.0).round() as u64).min(total);

        let edge_level = self.level.toggled();
        if !self.emit(edge, edge_level, sink, ctrl)?.completed() {
            self.level = Level::Low;
            return Ok(Advance::Interrupted);
        }
        self.level = Level::Low;
        self.emit(total - edge, Level::Low, sink, ctrl)
    }
}
