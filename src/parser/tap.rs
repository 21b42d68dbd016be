//! TAP container decoder.
//!
//! A TAP file is a plain sequence of `[length u16][payload]` records where
//! the payload's final byte is the XOR of everything before it. The first
//! record must be a 19-byte standard header, which also gives the file its
//! signature: the leading bytes `13 00 00`.
//!
//! A checksum mismatch anywhere makes the whole file unusable: no partial
//! descriptor list is exposed.

use super::{classify_payload, standard_header_name, ContainerParser, STANDARD_HEADER_LEN};
use crate::blocks::{BitTiming, BlockDescriptor, BlockKind, Content, DataRange, Tape, TapeKind};
use crate::consts::DEFAULT_PAUSE_MS;
use crate::storage::{read_range, read_u16_le, TapeSource};
use crate::{Result, TapeError};

/// TAP file parser.
pub struct TapParser;

impl TapParser {
    /// XOR checksum over a payload, excluding its trailing checksum byte.
    pub fn checksum(payload: &[u8]) -> u8 {
        payload.iter().fold(0u8, |acc, &b| acc ^ b)
    }

    fn decode_blocks<S: TapeSource>(&self, source: &mut S, size: u64) -> Result<Tape> {
        let mut blocks = Vec::new();
        let mut tape_name = String::new();
        let mut offset = 0u64;
        let mut after_header: Option<Content> = None;

        while offset + 2 <= size {
            let len = u32::from(read_u16_le(source, offset)?);
            if len == 0 {
                break;
            }
            let block_offset = offset + 2;
            if block_offset + u64::from(len) > size {
                log::warn!("TAP block {} runs past end of file", blocks.len());
                return Err(TapeError::Corrupted {
                    block: blocks.len(),
                    offset,
                });
            }

            let payload = read_range(source, block_offset, len as usize)?;
            let (body, stored) = payload.split_at(len as usize - 1);
            if Self::checksum(body) != stored[0] {
                log::warn!(
                    "TAP checksum mismatch at block {} (offset {})",
                    blocks.len(),
                    block_offset
                );
                return Err(TapeError::Corrupted {
                    block: blocks.len(),
                    offset: block_offset,
                });
            }

            let flag = payload[0];
            let type_byte = if len > 1 { payload[1] } else { 0 };
            let mut content = classify_payload(flag, type_byte, len, after_header.take());

            let mut name = None;
            if content.is_header() && len == STANDARD_HEADER_LEN {
                // A CODE header is only a SCREEN$ header if the data block
                // that follows is exactly one screen long.
                if content == Content::ByteHeader {
                    let next_off = block_offset + u64::from(len);
                    if next_off + 2 <= size
                        && u32::from(read_u16_le(source, next_off)?)
                            == crate::consts::SCREEN_BLOCK_SIZE
                    {
                        content = Content::ScreenHeader;
                    }
                }
                name = Some(standard_header_name(&payload));
                after_header = Some(content);

                // The first early header names the whole tape
                if tape_name.is_empty() && block_offset < 23 {
                    tape_name = name.clone().unwrap_or_default();
                }
            } else if content.is_header() {
                // Flag says header but the length does not fit one: data
                content = Content::ByteData;
            }

            let timing = if content.is_header() {
                BitTiming::rom_header()
            } else {
                BitTiming::rom_data()
            };

            blocks.push(BlockDescriptor {
                index: blocks.len(),
                id: 0x00,
                offset: block_offset,
                size: len,
                name,
                group: 0,
                kind: BlockKind::Standard {
                    pause_ms: DEFAULT_PAUSE_MS,
                    data: DataRange {
                        offset: block_offset,
                        len,
                    },
                    timing,
                    content,
                },
            });

            offset = block_offset + u64::from(len);
        }

        log::info!("TAP decoded: {} blocks, name {:?}", blocks.len(), tape_name);

        Ok(Tape {
            kind: TapeKind::Tap,
            name: tape_name,
            size,
            blocks,
        })
    }
}

impl ContainerParser for TapParser {
    fn parse<S: TapeSource>(&self, source: &mut S) -> Result<Tape> {
        let size = source.len()?;
        if size < 3 {
            return Err(TapeError::NotRecognized("file too short for TAP".into()));
        }

        // First record must be the 19-byte standard header: 13 00, flag 00
        let mut sig = [0u8; 3];
        source.read_at(0, &mut sig)?;
        if sig != [0x13, 0x00, 0x00] {
            return Err(TapeError::NotRecognized(
                "missing TAP standard header marker".into(),
            ));
        }

        self.decode_blocks(source, size)
    }

    fn name(&self) -> &str {
        "TAP"
    }
}
