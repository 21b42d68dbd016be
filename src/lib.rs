//! ZX Spectrum tape image player
//!
//! Converts TAP and TZX/TSX/CDT cassette containers into the precisely timed
//! square-wave pulse trains a real Spectrum expects on its tape input. The
//! decoded container becomes an array of block descriptors; a pulse
//! synthesizer turns each block's T-state timing into audio samples at a
//! fixed output rate, compensating rounding error pulse by pulse so long
//! recordings never drift.
//!
//! # Features
//! - TAP decoding with XOR checksum validation and header name extraction
//! - TZX 1.20 decoding: standard/turbo/pure data, pure tone, pulse
//!   sequences, direct recording, CSW (RLE and Z-RLE), generalized data
//!   blocks, loops, groups, pause/stop and the TSX Kansas City block
//! - Cycle-accurate half-pulse synthesis with a fractional rounding
//!   accumulator
//! - Playback orchestration with stop/pause polling at chunk granularity
//! - WAV export and optional real-time streaming output
//!
//! # Crate feature flags
//! - `streaming` (opt-in): real-time audio output (enables optional `rodio`
//!   dep)
//!
//! # Quick start
//! ```no_run
//! use tapecast::loader::load_file;
//! use tapecast::player::Player;
//! use tapecast::sink::MemorySink;
//!
//! let (tape, source) = load_file("game.tzx").unwrap();
//! let mut sink = MemorySink::new(44_100);
//! let mut player = Player::new(tape, source);
//! player.control().request_play();
//! player.play(&mut sink).unwrap();
//! ```

#![warn(missing_docs)]

pub mod blocks;
pub mod consts;
pub mod export;
pub mod loader;
pub mod parser;
pub mod player;
pub mod sink;
pub mod storage;
#[cfg(feature = "streaming")]
pub mod streaming;
pub mod synth;

/// Error types for tape decoding and playback operations
#[derive(thiserror::Error, Debug)]
pub enum TapeError {
    /// File is not a recognized tape container
    #[error("Not a recognized tape container: {0}")]
    NotRecognized(String),

    /// Checksum mismatch or block range beyond the end of the file
    #[error("Corrupted container at block {block}, offset {offset}")]
    Corrupted {
        /// Index of the first bad block
        block: usize,
        /// Byte offset where decoding stopped
        offset: u64,
    },

    /// Block id the decoder does not implement
    #[error("Block id 0x{0:02X} not implemented")]
    UnimplementedBlock(u8),

    /// Block count exceeded the configured ceiling
    #[error("Too many blocks (limit {0})")]
    TooManyBlocks(usize),

    /// A read ran past the end of the source
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// Decoding was aborted by an external request
    #[error("Decoding aborted")]
    Aborted,

    /// CSW payload decompression failed
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Direct-recording block resolves to an unusable sample rate
    #[error("Invalid sample rate in direct recording block")]
    InvalidSampleRate,

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for TapeError {
    fn from(msg: String) -> Self {
        TapeError::Other(msg)
    }
}

impl From<&str> for TapeError {
    fn from(msg: &str) -> Self {
        TapeError::Other(msg.to_string())
    }
}

/// Result type for tape operations
pub type Result<T> = std::result::Result<T, TapeError>;

// Public API exports
pub use blocks::{BlockDescriptor, BlockKind, Tape, TapeKind};
pub use loader::{load_bytes, load_file};
pub use player::{Player, PlayerEvent, PlaybackState, TapeControl};
pub use sink::{AudioSink, MemorySink};
pub use synth::{PulseSynth, SynthConfig};
