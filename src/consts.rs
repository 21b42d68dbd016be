//! Timing constants shared across the decoder, synthesizer and player.
//!
//! Pulse durations are expressed in T-states of the Spectrum's Z80 running
//! at 3.5 MHz; these are the ROM loader timings every standard block uses.

/// Z80 clock frequency the tape timings are expressed against, in Hz.
pub const CPU_HZ: u32 = 3_500_000;

/// Default output sample rate, in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Pilot half-pulse length, T-states.
pub const PILOT_PULSE_LEN: u16 = 2168;
/// Pilot half-pulse count preceding a header block.
pub const PILOT_PULSES_HEADER: u16 = 8063;
/// Pilot half-pulse count preceding a data block.
pub const PILOT_PULSES_DATA: u16 = 3223;
/// First sync pulse, T-states.
pub const SYNC1_LEN: u16 = 667;
/// Second sync pulse, T-states.
pub const SYNC2_LEN: u16 = 735;
/// "0" bit half-pulse, T-states.
pub const BIT0_LEN: u16 = 855;
/// "1" bit half-pulse, T-states.
pub const BIT1_LEN: u16 = 1710;

/// Default silence between blocks, milliseconds.
pub const DEFAULT_PAUSE_MS: u32 = 1000;

/// Tail appended when a tape ends on a zero-length pause, T-states.
/// Guarantees the final edge registers in the loading routine.
pub const PAUSE_TAIL_TSTATES: u32 = 3_500_000;

/// Samples per buffered write; also the stop/pause polling granularity.
pub const CHUNK_SAMPLES: usize = 512;

/// Bytes of block data streamed per partition during playback. Large blocks
/// are split so the whole payload never has to sit in memory at once.
pub const SPLIT_DATA_BYTES: u32 = 8192;

/// Default ceiling on decoded blocks per container.
pub const MAX_BLOCKS: usize = 4000;

/// A CODE block of exactly this size (flag + 6912 + checksum) is a SCREEN$.
pub const SCREEN_BLOCK_SIZE: u32 = 6914;
