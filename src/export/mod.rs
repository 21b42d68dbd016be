//! Offline rendering to audio files.

mod wav;

pub use wav::{export_to_wav, WavSink};
