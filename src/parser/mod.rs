//! Container parsers.
//!
//! Each container format gets its own parser walking the file block by
//! block through a [`TapeSource`] and producing a [`Tape`]. The per-format
//! modules own every byte-layout detail; nothing outside them recomputes
//! offsets.

use crate::blocks::{Content, Tape};
use crate::storage::TapeSource;
use crate::Result;

pub mod csw;
pub mod gdb;
pub mod tap;
pub mod tzx;

pub use tap::TapParser;
pub use tzx::TzxParser;

/// A tape container parser.
pub trait ContainerParser {
    /// Decode the whole container into a [`Tape`].
    fn parse<S: TapeSource>(&self, source: &mut S) -> Result<Tape>;

    /// Parser name for diagnostics.
    fn name(&self) -> &str;
}

/// Length of a standard header payload: flag + type + name + params + checksum.
pub const STANDARD_HEADER_LEN: u32 = 19;

/// Extract the 10-character program name from a standard header payload.
///
/// The name sits at payload bytes 2..12. Control characters map to spaces;
/// the Spectrum charset's pound, tilde and copyright glyphs are preserved.
pub fn standard_header_name(payload: &[u8]) -> String {
    let mut name = String::with_capacity(10);
    for &b in payload.iter().skip(2).take(10) {
        let ch = match b {
            96 => '£',
            126 => '~',
            127 => '©',
            0..=32 | 128.. => ' ',
            _ => b as char,
        };
        name.push(ch);
    }
    name.trim_end().to_string()
}

/// Classify a data payload from its flag byte, type byte and length.
///
/// Flag bytes below 0x80 mark headers; the type byte then selects the
/// header family, with 6914-byte CODE payloads recognized as SCREEN$.
/// `after` is the header classification of the preceding block, used to
/// label the data block that follows a program or screen header.
pub fn classify_payload(flag: u8, type_byte: u8, len: u32, after: Option<Content>) -> Content {
    use crate::consts::SCREEN_BLOCK_SIZE;

    if flag < 0x80 {
        match type_byte {
            0 => Content::ProgramHeader,
            1 => Content::NumberArrayHeader,
            2 => Content::CharArrayHeader,
            3 if len == SCREEN_BLOCK_SIZE => Content::ScreenHeader,
            3 => Content::ByteHeader,
            _ => Content::Opaque,
        }
    } else {
        match after {
            Some(Content::ProgramHeader) => Content::BasicData,
            Some(Content::ScreenHeader) => Content::ScreenData,
            _ if len == SCREEN_BLOCK_SIZE => Content::ScreenData,
            _ => Content::ByteData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_extraction_and_sanitizing() {
        let mut payload = vec![0u8, 0u8];
        payload.extend_from_slice(b"MANIC     ");
        payload.extend_from_slice(&[0u8; 7]);
        assert_eq!(standard_header_name(&payload), "MANIC");

        // Control and high characters become spaces, specials survive
        let mut weird = vec![0u8, 0u8];
        weird.extend_from_slice(&[b'A', 3, 96, 126, 127, 200, b'Z', b' ', b' ', b' ']);
        weird.extend_from_slice(&[0u8; 7]);
        assert_eq!(standard_header_name(&weird), "A £~© Z");
    }

    #[test]
    fn test_classify_headers() {
        assert_eq!(classify_payload(0, 0, 19, None), Content::ProgramHeader);
        assert_eq!(classify_payload(0, 1, 19, None), Content::NumberArrayHeader);
        assert_eq!(classify_payload(0, 2, 19, None), Content::CharArrayHeader);
        assert_eq!(classify_payload(0, 3, 19, None), Content::ByteHeader);
        assert_eq!(classify_payload(0, 3, 6914, None), Content::ScreenHeader);
    }

    #[test]
    fn test_classify_data_follows_header_state() {
        assert_eq!(
            classify_payload(0xFF, 0, 100, Some(Content::ProgramHeader)),
            Content::BasicData
        );
        assert_eq!(
            classify_payload(0xFF, 0, 6914, Some(Content::ScreenHeader)),
            Content::ScreenData
        );
        assert_eq!(classify_payload(0xFF, 0, 6914, None), Content::ScreenData);
        assert_eq!(classify_payload(0xFF, 0, 100, None), Content::ByteData);
    }
}
