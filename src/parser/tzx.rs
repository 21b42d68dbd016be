//! TZX/TSX/CDT container decoder.
//!
//! A TZX file is the signature `ZXTape!` + 0x1A + two version bytes,
//! followed by `[id byte][id-specific payload]` records. Every id has its
//! own field layout and therefore its own consumed-byte count; each
//! sub-decoder here returns the parsed [`BlockKind`] together with that
//! count, so the walker below only ever adds.
//!
//! Jump (0x23), call (0x26) and return (0x27) blocks are not implemented:
//! hitting one aborts the decode with a distinct error, as does an unknown
//! id. The walker also stops on an externally signalled abort flag or when
//! the block-count ceiling is reached.

use super::{classify_payload, standard_header_name, ContainerParser, STANDARD_HEADER_LEN};
use crate::blocks::{
    BitTiming, BlockDescriptor, BlockKind, Content, DataRange, Tape, TapeKind,
};
use crate::consts::{self, MAX_BLOCKS};
use crate::parser::{csw, gdb};
use crate::storage::{
    read_range, read_u16_le, read_u24_le, read_u32_le, read_u8, TapeSource,
};
use crate::{Result, TapeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// TZX signature: magic text plus the end-of-text marker byte.
const TZX_SIGNATURE: &[u8; 8] = b"ZXTape!\x1A";

/// Offset of the first block id, right after signature and version bytes.
const FIRST_BLOCK_OFFSET: u64 = 10;

/// One decoded record: the parsed variant, the bytes it consumed from the
/// id byte onwards, the display size and an extracted name if any.
struct Decoded {
    kind: BlockKind,
    consumed: u64,
    size: u32,
    name: Option<String>,
}

/// TZX file parser.
pub struct TzxParser {
    /// Ceiling on decoded blocks; decoding aborts beyond it.
    pub max_blocks: usize,
    /// External abort request checked between blocks.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for TzxParser {
    fn default() -> Self {
        TzxParser {
            max_blocks: MAX_BLOCKS,
            abort: None,
        }
    }
}

impl TzxParser {
    /// Parser with default limits and no abort hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that stops early when `abort` becomes true.
    pub fn with_abort(abort: Arc<AtomicBool>) -> Self {
        TzxParser {
            abort: Some(abort),
            ..Self::default()
        }
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Read a standard-header name from a data payload when it carries one.
    fn payload_name<S: TapeSource>(
        source: &mut S,
        data: DataRange,
        content: Content,
    ) -> Result<Option<String>> {
        if content.is_header() && data.len >= STANDARD_HEADER_LEN {
            let header = read_range(source, data.offset, STANDARD_HEADER_LEN as usize)?;
            Ok(Some(standard_header_name(&header)))
        } else {
            Ok(None)
        }
    }

    // ID 0x10 — standard speed data: pause u16, length u16, payload.
    fn decode_standard<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let pause_ms = u32::from(read_u16_le(source, off + 1)?);
        let len = u32::from(read_u16_le(source, off + 3)?);
        let data = DataRange {
            offset: off + 5,
            len,
        };

        let flag = if len >= 1 {
            read_u8(source, data.offset)?
        } else {
            0xFF
        };
        let type_byte = if len >= 2 {
            read_u8(source, data.offset + 1)?
        } else {
            0
        };
        let content = classify_payload(flag, type_byte, len, None);

        let pilot_pulses = if flag < 0x80 {
            consts::PILOT_PULSES_HEADER
        } else {
            consts::PILOT_PULSES_DATA
        };
        let timing = BitTiming {
            pilot_pulses,
            ..BitTiming::rom_header()
        };

        let name = Self::payload_name(source, data, content)?;

        Ok(Decoded {
            kind: BlockKind::Standard {
                pause_ms,
                data,
                timing,
                content,
            },
            consumed: 5 + u64::from(len),
            size: len,
            name,
        })
    }

    // ID 0x11 — turbo speed data: five timings, pilot count, used bits,
    // pause, u24 length, payload.
    fn decode_turbo<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let timing = BitTiming {
            pilot_len: read_u16_le(source, off + 1)?,
            sync1: read_u16_le(source, off + 3)?,
            sync2: read_u16_le(source, off + 5)?,
            bit0: read_u16_le(source, off + 7)?,
            bit1: read_u16_le(source, off + 9)?,
            pilot_pulses: read_u16_le(source, off + 11)?,
        };
        let used_bits = read_u8(source, off + 13)?;
        let pause_ms = u32::from(read_u16_le(source, off + 14)?);
        let len = read_u24_le(source, off + 16)?;
        let data = DataRange {
            offset: off + 19,
            len,
        };

        // Undersized packets are a protection trick, never a real header
        let (content, name) = if len < STANDARD_HEADER_LEN {
            (Content::Opaque, None)
        } else {
            let flag = read_u8(source, data.offset)?;
            if flag < 0x80 {
                let type_byte = read_u8(source, data.offset + 1)?;
                let content = classify_payload(flag, type_byte, len, None);
                let name = Self::payload_name(source, data, content)?;
                (content, name)
            } else {
                (Content::ByteData, None)
            }
        };

        Ok(Decoded {
            kind: BlockKind::Turbo {
                pause_ms,
                data,
                timing,
                used_bits,
                content,
            },
            consumed: 19 + u64::from(len),
            size: len,
            name,
        })
    }

    // ID 0x12 — pure tone: pulse length u16, pulse count u16.
    fn decode_pure_tone<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        Ok(Decoded {
            kind: BlockKind::PureTone {
                pulse_len: read_u16_le(source, off + 1)?,
                pulse_count: read_u16_le(source, off + 3)?,
            },
            consumed: 5,
            size: 4,
            name: None,
        })
    }

    // ID 0x13 — pulse sequence: count u8, count pulse lengths.
    fn decode_pulse_sequence<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let count = read_u8(source, off + 1)?;
        let mut pulses = Vec::with_capacity(count as usize);
        let mut coff = off + 2;
        for _ in 0..count {
            pulses.push(read_u16_le(source, coff)?);
            coff += 2;
        }
        Ok(Decoded {
            kind: BlockKind::PulseSequence { pulses },
            consumed: 2 + 2 * u64::from(count),
            size: 2 * u32::from(count) + 1,
            name: None,
        })
    }

    // ID 0x14 — pure data: bit timings, used bits, pause, u24 length,
    // payload. No pilot, no sync.
    fn decode_pure_data<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let bit0 = read_u16_le(source, off + 1)?;
        let bit1 = read_u16_le(source, off + 3)?;
        let used_bits = read_u8(source, off + 5)?;
        let pause_ms = u32::from(read_u16_le(source, off + 6)?);
        let len = read_u24_le(source, off + 8)?;
        let data = DataRange {
            offset: off + 11,
            len,
        };

        Ok(Decoded {
            kind: BlockKind::PureData {
                pause_ms,
                data,
                bit0,
                bit1,
                used_bits,
            },
            consumed: 11 + u64::from(len),
            size: len,
            name: None,
        })
    }

    // ID 0x15 — direct recording: T-states per sample, pause, used bits,
    // u24 length, sampled payload.
    fn decode_direct<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let tstates_per_sample = read_u16_le(source, off + 1)?;
        let pause_ms = u32::from(read_u16_le(source, off + 3)?);
        let used_bits = read_u8(source, off + 5)?;
        let len = read_u24_le(source, off + 6)?;
        let data = DataRange {
            offset: off + 9,
            len,
        };

        Ok(Decoded {
            kind: BlockKind::DirectRecording {
                pause_ms,
                data,
                tstates_per_sample,
                used_bits,
            },
            consumed: 9 + u64::from(len),
            size: len,
            name: None,
        })
    }

    // ID 0x18 — CSW recording: u32 length, pause, u24 sampling rate,
    // compression type, stored pulse count, compressed pulse stream.
    fn decode_csw<S: TapeSource>(source: &mut S, off: u64, index: usize) -> Result<Decoded> {
        let block_len = read_u32_le(source, off + 1)?;
        if block_len < 10 {
            return Err(TapeError::Corrupted {
                block: index,
                offset: off,
            });
        }
        let pause_ms = u32::from(read_u16_le(source, off + 5)?);
        let sample_rate = read_u24_le(source, off + 7)?;
        let compression_type = read_u8(source, off + 10)?;
        let stored_pulses = read_u32_le(source, off + 11)?;

        let payload = read_range(source, off + 15, (block_len - 10) as usize)?;
        let pulses = csw::decode_payload(&payload, compression_type)?;
        log::debug!(
            "CSW block: {} pulse runs decoded ({} declared), {} Hz",
            pulses.len(),
            stored_pulses,
            sample_rate
        );

        Ok(Decoded {
            kind: BlockKind::Csw {
                pause_ms,
                sample_rate,
                pulses,
            },
            consumed: 5 + u64::from(block_len),
            size: block_len,
            name: None,
        })
    }

    // ID 0x19 — generalized data block: u32 length, pause, symbol tables
    // and bit-packed stream.
    fn decode_generalized<S: TapeSource>(
        source: &mut S,
        off: u64,
        index: usize,
    ) -> Result<Decoded> {
        let block_len = read_u32_le(source, off + 1)?;
        let pause_ms = u32::from(read_u16_le(source, off + 5)?);
        let gdb = gdb::decode(source, off, block_len, index)?;

        Ok(Decoded {
            kind: BlockKind::Generalized { pause_ms, gdb },
            consumed: 5 + u64::from(block_len),
            size: block_len,
            name: None,
        })
    }

    // ID 0x21 — group start: label length u8, label text.
    fn decode_group_start<S: TapeSource>(source: &mut S, off: u64) -> Result<Decoded> {
        let len = read_u8(source, off + 1)?;
        let raw = read_range(source, off + 2, len as usize)?;
        let name = String::from_utf8_lossy(&raw).trim_end().to_string();

        Ok(Decoded {
            kind: BlockKind::GroupStart { name: name.clone() },
            consumed: 2 + u64::from(len),
            size: u32::from(len),
            name: Some(name),
        })
    }

    fn decode_block<S: TapeSource>(
        &self,
        source: &mut S,
        id: u8,
        off: u64,
        index: usize,
    ) -> Result<Decoded> {
        let simple = |kind: BlockKind, consumed: u64| Decoded {
            kind,
            consumed,
            size: consumed.saturating_sub(1) as u32,
            name: None,
        };

        match id {
            0x10 => Self::decode_standard(source, off),
            0x11 => Self::decode_turbo(source, off),
            0x12 => Self::decode_pure_tone(source, off),
            0x13 => Self::decode_pulse_sequence(source, off),
            0x14 => Self::decode_pure_data(source, off),
            0x15 => Self::decode_direct(source, off),
            0x18 => Self::decode_csw(source, off, index),
            0x19 => Self::decode_generalized(source, off, index),
            0x20 => Ok(simple(
                BlockKind::PauseOrStop {
                    duration_ms: u32::from(read_u16_le(source, off + 1)?),
                },
                3,
            )),
            0x21 => Self::decode_group_start(source, off),
            0x22 => Ok(simple(BlockKind::GroupEnd, 1)),
            0x24 => Ok(simple(
                BlockKind::LoopStart {
                    repetitions: read_u16_le(source, off + 1)?,
                },
                3,
            )),
            0x25 => Ok(simple(BlockKind::LoopEnd, 1)),
            0x28 => {
                let len = read_u16_le(source, off + 1)?;
                Ok(simple(BlockKind::SelectBlock, 3 + u64::from(len)))
            }
            0x2A => Ok(simple(BlockKind::StopTape48k, 5)),
            0x2B => Ok(simple(
                BlockKind::SetSignalLevel {
                    level: read_u8(source, off + 5)?,
                },
                6,
            )),
            0x30 => {
                let len = read_u8(source, off + 1)?;
                let raw = read_range(source, off + 2, len as usize)?;
                Ok(simple(
                    BlockKind::TextDescription {
                        text: String::from_utf8_lossy(&raw).trim_end().to_string(),
                    },
                    2 + u64::from(len),
                ))
            }
            0x31 => {
                let display_s = read_u8(source, off + 1)?;
                let len = read_u8(source, off + 2)?;
                let raw = read_range(source, off + 3, len as usize)?;
                Ok(simple(
                    BlockKind::Message {
                        display_s,
                        text: String::from_utf8_lossy(&raw).trim_end().to_string(),
                    },
                    3 + u64::from(len),
                ))
            }
            0x32 => {
                let len = read_u16_le(source, off + 1)?;
                Ok(simple(BlockKind::ArchiveInfo, 3 + u64::from(len)))
            }
            0x33 => {
                let count = read_u8(source, off + 1)?;
                Ok(simple(BlockKind::HardwareType, 2 + 3 * u64::from(count)))
            }
            0x35 => {
                let len = read_u32_le(source, off + 17)?;
                Ok(simple(BlockKind::CustomInfo, 21 + u64::from(len)))
            }
            0x4B => Self::decode_kansas_city(source, off, index),
            0x5A => Ok(simple(BlockKind::Glue, 10)),
            // Jump, call sequence, return from sequence: flow control this
            // player does not model
            other => Err(TapeError::UnimplementedBlock(other)),
        }
    }

    // ID 0x4B — TSX Kansas City block: u32 length, pause, pilot and bit
    // timings, packed bit/byte configuration, payload.
    fn decode_kansas_city<S: TapeSource>(
        source: &mut S,
        off: u64,
        index: usize,
    ) -> Result<Decoded> {
        let block_len = read_u32_le(source, off + 1)?;
        if block_len < 12 {
            return Err(TapeError::Corrupted {
                block: index,
                offset: off,
            });
        }
        let len = block_len - 12;

        Ok(Decoded {
            kind: BlockKind::KansasCity {
                pause_ms: u32::from(read_u16_le(source, off + 5)?),
                pilot_len: read_u16_le(source, off + 7)?,
                pilot_pulses: read_u16_le(source, off + 9)?,
                bit0: read_u16_le(source, off + 11)?,
                bit1: read_u16_le(source, off + 13)?,
                bit_cfg: read_u8(source, off + 15)?,
                byte_cfg: read_u8(source, off + 16)?,
                data: DataRange {
                    offset: off + 17,
                    len,
                },
            },
            consumed: 5 + u64::from(block_len),
            size: len,
            name: None,
        })
    }
}

impl ContainerParser for TzxParser {
    fn parse<S: TapeSource>(&self, source: &mut S) -> Result<Tape> {
        let size = source.len()?;
        if size < FIRST_BLOCK_OFFSET {
            return Err(TapeError::NotRecognized("file too short for TZX".into()));
        }

        let mut sig = [0u8; 8];
        source.read_at(0, &mut sig)?;
        if &sig != TZX_SIGNATURE {
            return Err(TapeError::NotRecognized("missing ZXTape! signature".into()));
        }
        let major = read_u8(source, 8)?;
        let minor = read_u8(source, 9)?;
        log::info!("TZX revision {}.{:02}", major, minor);

        let mut blocks: Vec<BlockDescriptor> = Vec::new();
        let mut tape_name = String::new();
        let mut offset = FIRST_BLOCK_OFFSET;
        let mut current_group = 0u16;
        let mut next_group = 1u16;

        while offset < size {
            if self.aborted() {
                log::warn!("TZX decode aborted at offset {}", offset);
                return Err(TapeError::Aborted);
            }
            if blocks.len() >= self.max_blocks {
                return Err(TapeError::TooManyBlocks(self.max_blocks));
            }

            let id = read_u8(source, offset)?;
            let decoded = self.decode_block(source, id, offset, blocks.len())?;

            let next_offset = offset + decoded.consumed;
            if next_offset > size {
                log::warn!("block id 0x{:02X} at {} runs past end of file", id, offset);
                return Err(TapeError::Corrupted {
                    block: blocks.len(),
                    offset,
                });
            }

            match &decoded.kind {
                BlockKind::GroupStart { .. } => {
                    current_group = next_group;
                    next_group = next_group.wrapping_add(1);
                }
                BlockKind::Standard { content, .. } => {
                    if tape_name.is_empty() && *content == Content::ProgramHeader {
                        tape_name = decoded.name.clone().unwrap_or_default();
                    }
                }
                _ => {}
            }

            let group = current_group;
            if matches!(decoded.kind, BlockKind::GroupEnd) {
                current_group = 0;
            }

            blocks.push(BlockDescriptor {
                index: blocks.len(),
                id,
                offset,
                size: decoded.size,
                name: decoded.name,
                group,
                kind: decoded.kind,
            });

            offset = next_offset;
        }

        log::info!("TZX decoded: {} blocks, name {:?}", blocks.len(), tape_name);

        Ok(Tape {
            kind: TapeKind::Tzx,
            name: tape_name,
            size,
            blocks,
        })
    }

    fn name(&self) -> &str {
        "TZX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    pub fn tzx_header() -> Vec<u8> {
        let mut data = TZX_SIGNATURE.to_vec();
        data.push(1);
        data.push(20);
        data
    }

    /// 19-byte standard header payload with checksum.
    fn std_header_payload(type_byte: u8, name: &str) -> Vec<u8> {
        let mut payload = vec![0x00, type_byte];
        let mut padded = name.as_bytes().to_vec();
        padded.resize(10, b' ');
        payload.extend_from_slice(&padded);
        payload.extend_from_slice(&[0u8; 6]);
        let chk = payload.iter().fold(0u8, |acc, &b| acc ^ b);
        payload.push(chk);
        payload
    }

    fn standard_block(pause_ms: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0x10];
        data.extend_from_slice(&pause_ms.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn turbo_block(payload: &[u8], used_bits: u8) -> Vec<u8> {
        let mut data = vec![0x11];
        for timing in [2600u16, 700, 700, 880, 1760, 4000] {
            data.extend_from_slice(&timing.to_le_bytes());
        }
        data.push(used_bits);
        data.extend_from_slice(&500u16.to_le_bytes());
        let len = payload.len() as u32;
        data.extend_from_slice(&len.to_le_bytes()[..3]);
        data.extend_from_slice(payload);
        data
    }

    fn parse(bytes: Vec<u8>) -> Result<Tape> {
        TzxParser::new().parse(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_rejects_bad_signature() {
        assert!(matches!(
            parse(b"NotATape!!".to_vec()),
            Err(TapeError::NotRecognized(_))
        ));
    }

    #[test]
    fn test_standard_block_with_program_header() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&standard_block(1000, &std_header_payload(0, "JETPAC")));

        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 1);
        assert_eq!(tape.name, "JETPAC");

        let block = &tape.blocks[0];
        assert_eq!(block.id, 0x10);
        assert!(block.playable());
        match &block.kind {
            BlockKind::Standard {
                pause_ms,
                timing,
                content,
                data,
            } => {
                assert_eq!(*pause_ms, 1000);
                assert_eq!(*content, Content::ProgramHeader);
                assert_eq!(timing.pilot_pulses, 8063);
                assert_eq!(timing.pilot_len, 2168);
                assert_eq!(data.len, 19);
                assert_eq!(data.offset, 15);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_standard_data_block_gets_short_pilot() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&standard_block(0, &[0xFF, 1, 2, 3, 0xFF ^ 1 ^ 2 ^ 3]));

        let tape = parse(bytes).unwrap();
        match &tape.blocks[0].kind {
            BlockKind::Standard { timing, content, .. } => {
                assert_eq!(timing.pilot_pulses, 3223);
                assert_eq!(*content, Content::ByteData);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_turbo_short_block_is_opaque() {
        // 3-byte payload with a header-looking flag byte: protection trick
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&turbo_block(&[0x00, 0x00, 0x01], 6));

        let tape = parse(bytes).unwrap();
        match &tape.blocks[0].kind {
            BlockKind::Turbo {
                content, used_bits, ..
            } => {
                assert_eq!(*content, Content::Opaque);
                assert_eq!(*used_bits, 6);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(tape.blocks[0].name.is_none());
    }

    #[test]
    fn test_turbo_header_extracts_name_and_timing() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&turbo_block(&std_header_payload(3, "SCREENY"), 8));

        let tape = parse(bytes).unwrap();
        let block = &tape.blocks[0];
        assert_eq!(block.name.as_deref(), Some("SCREENY"));
        match &block.kind {
            BlockKind::Turbo { timing, .. } => {
                assert_eq!(timing.pilot_len, 2600);
                assert_eq!(timing.pilot_pulses, 4000);
                assert_eq!(timing.bit1, 1760);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_pure_tone_and_pulse_sequence() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x12]);
        bytes.extend_from_slice(&2168u16.to_le_bytes());
        bytes.extend_from_slice(&3223u16.to_le_bytes());
        bytes.extend_from_slice(&[0x13, 3]);
        for pulse in [400u16, 600, 800] {
            bytes.extend_from_slice(&pulse.to_le_bytes());
        }

        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 2);
        assert_eq!(
            tape.blocks[0].kind,
            BlockKind::PureTone {
                pulse_len: 2168,
                pulse_count: 3223
            }
        );
        assert_eq!(
            tape.blocks[1].kind,
            BlockKind::PulseSequence {
                pulses: vec![400, 600, 800]
            }
        );
    }

    #[test]
    fn test_pure_data_and_direct_recording() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x14]);
        bytes.extend_from_slice(&855u16.to_le_bytes());
        bytes.extend_from_slice(&1710u16.to_le_bytes());
        bytes.push(5);
        bytes.extend_from_slice(&250u16.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes()[..3]);
        bytes.extend_from_slice(&[0xAB, 0xCD]);

        bytes.extend_from_slice(&[0x15]);
        bytes.extend_from_slice(&79u16.to_le_bytes()); // ~44.3 kHz
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(8);
        bytes.extend_from_slice(&3u32.to_le_bytes()[..3]);
        bytes.extend_from_slice(&[0xF0, 0x0F, 0xAA]);

        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 2);
        match &tape.blocks[0].kind {
            BlockKind::PureData {
                used_bits,
                pause_ms,
                data,
                ..
            } => {
                assert_eq!(*used_bits, 5);
                assert_eq!(*pause_ms, 250);
                assert_eq!(data.len, 2);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        match &tape.blocks[1].kind {
            BlockKind::DirectRecording {
                tstates_per_sample, ..
            } => assert_eq!(*tstates_per_sample, 79),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_csw_block_with_rle_payload() {
        let rle = [10u8, 0, 3, 7];
        let block_len = 10 + rle.len() as u32;

        let mut bytes = tzx_header();
        bytes.push(0x18);
        bytes.extend_from_slice(&block_len.to_le_bytes());
        bytes.extend_from_slice(&100u16.to_le_bytes()); // pause
        bytes.extend_from_slice(&44100u32.to_le_bytes()[..3]);
        bytes.push(1); // RLE
        bytes.extend_from_slice(&5u32.to_le_bytes()); // stored pulse count
        bytes.extend_from_slice(&rle);

        let tape = parse(bytes).unwrap();
        match &tape.blocks[0].kind {
            BlockKind::Csw {
                sample_rate,
                pulses,
                pause_ms,
            } => {
                assert_eq!(*sample_rate, 44100);
                assert_eq!(*pause_ms, 100);
                assert_eq!(pulses.len(), 3);
                assert_eq!(pulses[1].repeat, 3);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_flow_control_blocks() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x21, 4]);
        bytes.extend_from_slice(b"SIDE");
        bytes.extend_from_slice(&[0x24]);
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&[0x12]);
        bytes.extend_from_slice(&2168u16.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(&[0x25]);
        bytes.extend_from_slice(&[0x22]);
        bytes.extend_from_slice(&[0x20]);
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 6);
        assert_eq!(
            tape.blocks[0].kind,
            BlockKind::GroupStart {
                name: "SIDE".into()
            }
        );
        assert_eq!(tape.blocks[1].kind, BlockKind::LoopStart { repetitions: 3 });
        assert_eq!(tape.blocks[3].kind, BlockKind::LoopEnd);
        assert_eq!(tape.blocks[4].kind, BlockKind::GroupEnd);
        assert_eq!(
            tape.blocks[5].kind,
            BlockKind::PauseOrStop { duration_ms: 0 }
        );

        // Everything between start and end carries the group index
        assert_eq!(tape.blocks[0].group, 1);
        assert_eq!(tape.blocks[2].group, 1);
        assert_eq!(tape.blocks[4].group, 1);
        assert_eq!(tape.blocks[5].group, 0);
    }

    #[test]
    fn test_info_blocks_are_skipped_correctly() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x30, 5]);
        bytes.extend_from_slice(b"hello");
        bytes.extend_from_slice(&[0x31, 2, 3]);
        bytes.extend_from_slice(b"msg");
        bytes.extend_from_slice(&[0x32]);
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend_from_slice(&[0x33, 2]);
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0x2B]);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&[0x2A]);
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 6);
        assert_eq!(
            tape.blocks[0].kind,
            BlockKind::TextDescription {
                text: "hello".into()
            }
        );
        assert_eq!(
            tape.blocks[1].kind,
            BlockKind::Message {
                display_s: 2,
                text: "msg".into()
            }
        );
        assert_eq!(tape.blocks[2].kind, BlockKind::ArchiveInfo);
        assert_eq!(tape.blocks[3].kind, BlockKind::HardwareType);
        assert_eq!(tape.blocks[4].kind, BlockKind::SetSignalLevel { level: 1 });
        assert_eq!(tape.blocks[5].kind, BlockKind::StopTape48k);
        assert!(tape.blocks.iter().all(|b| !b.playable()));
    }

    #[test]
    fn test_kansas_city_block() {
        let payload = [0x55u8, 0xAA];
        let block_len = 12 + payload.len() as u32;

        let mut bytes = tzx_header();
        bytes.push(0x4B);
        bytes.extend_from_slice(&block_len.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // pause
        bytes.extend_from_slice(&729u16.to_le_bytes()); // pilot len
        bytes.extend_from_slice(&30720u16.to_le_bytes()); // pilot pulses
        bytes.extend_from_slice(&1458u16.to_le_bytes()); // bit0
        bytes.extend_from_slice(&729u16.to_le_bytes()); // bit1
        bytes.push(0x24); // 2 pulses per zero, 4 per one
        bytes.push(0x54); // 1 leading zero bit, 2 trailing one bits
        bytes.extend_from_slice(&payload);

        let tape = parse(bytes).unwrap();
        match &tape.blocks[0].kind {
            BlockKind::KansasCity {
                pilot_len,
                bit_cfg,
                byte_cfg,
                data,
                ..
            } => {
                assert_eq!(*pilot_len, 729);
                assert_eq!(*bit_cfg, 0x24);
                assert_eq!(*byte_cfg, 0x54);
                assert_eq!(data.len, 2);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_generalized_block_round_trip() {
        // Pilot-only GDB: one symbol alphabet, one run of 5 repeats
        let mut gdb = vec![0x19u8];
        let body: Vec<u8> = {
            let mut b = Vec::new();
            b.extend_from_slice(&0u16.to_le_bytes()); // pause
            b.extend_from_slice(&1u32.to_le_bytes()); // TOTP
            b.push(1); // NPP
            b.push(1); // ASP
            b.extend_from_slice(&0u32.to_le_bytes()); // TOTD
            b.push(0); // NPD
            b.push(1); // ASD
            b.push(0x00); // symbol 0: toggle
            b.extend_from_slice(&2168u16.to_le_bytes());
            b.push(0); // run: symbol 0
            b.extend_from_slice(&5u16.to_le_bytes()); // repeat 5
            b
        };
        gdb.extend_from_slice(&(body.len() as u32).to_le_bytes());
        gdb.extend_from_slice(&body);

        let mut bytes = tzx_header();
        bytes.extend_from_slice(&gdb);

        let tape = parse(bytes).unwrap();
        match &tape.blocks[0].kind {
            BlockKind::Generalized { gdb, .. } => {
                assert_eq!(gdb.totp, 1);
                assert_eq!(gdb.pilot_stream[0].repeat, 5);
                assert_eq!(gdb.pilot_symbols[0].pulses, vec![2168]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unimplemented_id_aborts() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x23]); // jump to block
        bytes.extend_from_slice(&2u16.to_le_bytes());

        assert!(matches!(
            parse(bytes),
            Err(TapeError::UnimplementedBlock(0x23))
        ));
    }

    #[test]
    fn test_block_count_ceiling() {
        let mut bytes = tzx_header();
        for _ in 0..4 {
            bytes.extend_from_slice(&[0x22]);
        }

        let parser = TzxParser {
            max_blocks: 3,
            abort: None,
        };
        assert!(matches!(
            parser.parse(&mut Cursor::new(bytes)),
            Err(TapeError::TooManyBlocks(3))
        ));
    }

    #[test]
    fn test_abort_flag_stops_decode() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x22]);

        let flag = Arc::new(AtomicBool::new(true));
        let parser = TzxParser::with_abort(flag);
        assert!(matches!(
            parser.parse(&mut Cursor::new(bytes)),
            Err(TapeError::Aborted)
        ));
    }

    #[test]
    fn test_declared_length_past_eof_is_corruption() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&[0x30, 200]); // 200 bytes of text that are not there
        bytes.extend_from_slice(b"short");

        assert!(parse(bytes).is_err());
    }

    #[test]
    fn test_offset_monotonicity() {
        let mut bytes = tzx_header();
        bytes.extend_from_slice(&standard_block(0, &std_header_payload(0, "A")));
        bytes.extend_from_slice(&[0x12]);
        bytes.extend_from_slice(&1000u16.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(&[0x20]);
        bytes.extend_from_slice(&500u16.to_le_bytes());

        let size = bytes.len() as u64;
        let tape = parse(bytes).unwrap();
        assert_eq!(tape.num_blocks(), 3);

        let mut prev = 0u64;
        for block in &tape.blocks {
            assert!(block.offset > prev || block.index == 0);
            prev = block.offset;
        }
        assert!(prev < size);
    }

    #[test]
    fn test_idempotent_reload() {
        let mut bytes_a = tzx_header();
        bytes_a.extend_from_slice(&standard_block(1000, &std_header_payload(0, "FIRST")));

        let mut bytes_b = tzx_header();
        bytes_b.extend_from_slice(&standard_block(0, &std_header_payload(3, "OTHER")));

        let first = parse(bytes_a.clone()).unwrap();
        let _other = parse(bytes_b).unwrap();
        let again = parse(bytes_a).unwrap();
        assert_eq!(first, again);
    }
}
