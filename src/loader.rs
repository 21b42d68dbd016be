//! Container loading with signature-based format detection.
//!
//! The file extension is only a hint; what decides the parser is the
//! content. A TZX (or TSX/CDT, same layout) starts with `ZXTape!` + 0x1A,
//! a TAP with the `13 00 00` standard-header marker.

use crate::blocks::Tape;
use crate::parser::{ContainerParser, TapParser, TzxParser};
use crate::storage::TapeSource;
use crate::{Result, TapeError};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

/// Detected container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detected {
    Tap,
    Tzx,
}

fn detect<S: TapeSource>(source: &mut S) -> Result<Detected> {
    let mut head = [0u8; 8];
    source
        .read_at(0, &mut head)
        .map_err(|_| TapeError::NotRecognized("file too short".into()))?;

    if &head == b"ZXTape!\x1A" {
        Ok(Detected::Tzx)
    } else if head[0] == 0x13 && head[1] == 0x00 && head[2] == 0x00 {
        Ok(Detected::Tap)
    } else {
        Err(TapeError::NotRecognized(
            "neither a TZX signature nor a TAP header marker".into(),
        ))
    }
}

/// Decode a container from any seekable source, auto-detecting the format.
pub fn load_source<S: TapeSource>(source: &mut S) -> Result<Tape> {
    match detect(source)? {
        Detected::Tzx => TzxParser::new().parse(source),
        Detected::Tap => TapParser.parse(source),
    }
}

/// Decode a container from a byte vector. Returns the tape together with a
/// cursor over the bytes for subsequent block-data reads during playback.
pub fn load_bytes(data: Vec<u8>) -> Result<(Tape, Cursor<Vec<u8>>)> {
    let mut cursor = Cursor::new(data);
    let tape = load_source(&mut cursor)?;
    Ok((tape, cursor))
}

/// Open and decode a container file. Returns the tape together with the
/// open file for subsequent block-data reads during playback.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<(Tape, File)> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let mut tape = load_source(&mut file)?;

    if tape.name.is_empty() {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            tape.name = stem.to_string();
        }
    }
    log::info!(
        "loaded {:?}: {} blocks, {} bytes",
        path,
        tape.num_blocks(),
        tape.size
    );
    Ok((tape, file))
}
