//! Decoded block descriptors and the tape container that owns them.
//!
//! Every supported block id maps to one [`BlockKind`] variant carrying that
//! id's parsed fields. The per-id decode routines in [`crate::parser`]
//! return a variant together with the byte count they consumed, so the
//! container walker never recomputes offsets. Nested buffers (pulse
//! sequences, symbol tables, decompressed CSW pulses) are owned by their
//! descriptor and freed when the [`Tape`] is dropped.

use crate::consts;
use crate::parser::csw::CswPulse;
use crate::parser::gdb::GdbBlock;

/// Byte range of a block's embedded data payload within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    /// Absolute offset of the first payload byte.
    pub offset: u64,
    /// Payload length in bytes.
    pub len: u32,
}

/// Pulse timing for a bit-encoded data block, in T-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    /// Pilot half-pulse length.
    pub pilot_len: u16,
    /// Number of pilot half-pulses.
    pub pilot_pulses: u16,
    /// First sync pulse.
    pub sync1: u16,
    /// Second sync pulse.
    pub sync2: u16,
    /// "0" bit half-pulse.
    pub bit0: u16,
    /// "1" bit half-pulse.
    pub bit1: u16,
}

impl BitTiming {
    /// ROM loader timing with the pilot run used before header blocks.
    pub fn rom_header() -> Self {
        BitTiming {
            pilot_len: consts::PILOT_PULSE_LEN,
            pilot_pulses: consts::PILOT_PULSES_HEADER,
            sync1: consts::SYNC1_LEN,
            sync2: consts::SYNC2_LEN,
            bit0: consts::BIT0_LEN,
            bit1: consts::BIT1_LEN,
        }
    }

    /// ROM loader timing with the shorter pilot run used before data blocks.
    pub fn rom_data() -> Self {
        BitTiming {
            pilot_pulses: consts::PILOT_PULSES_DATA,
            ..Self::rom_header()
        }
    }
}

/// Classification of a data payload, derived from its flag and type bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    /// BASIC program header (type byte 0).
    ProgramHeader,
    /// Numeric array header (type byte 1).
    NumberArrayHeader,
    /// Character array header (type byte 2).
    CharArrayHeader,
    /// CODE header (type byte 3).
    ByteHeader,
    /// CODE header whose data block is exactly one SCREEN$.
    ScreenHeader,
    /// Data block following a program header.
    BasicData,
    /// 6914-byte data block: a SCREEN$.
    ScreenData,
    /// Any other data block.
    ByteData,
    /// Payload with no recognizable header structure (protection schemes).
    Opaque,
}

impl Content {
    /// Human-readable name, as shown on the block listing.
    pub fn type_name(self) -> &'static str {
        match self {
            Content::ProgramHeader => "PROGRAM - HEADER",
            Content::NumberArrayHeader => "ARRAY.NUM - HEADER",
            Content::CharArrayHeader => "ARRAY.CHR - HEADER",
            Content::ByteHeader => "BYTE - HEADER",
            Content::ScreenHeader => "BYTE <SCREEN> - HEADER",
            Content::BasicData => "BASIC DATA",
            Content::ScreenData => "SCREEN DATA",
            Content::ByteData => "BYTE DATA",
            Content::Opaque => "BYTE DATA",
        }
    }

    /// Whether this payload is one of the 19-byte standard headers.
    pub fn is_header(self) -> bool {
        matches!(
            self,
            Content::ProgramHeader
                | Content::NumberArrayHeader
                | Content::CharArrayHeader
                | Content::ByteHeader
                | Content::ScreenHeader
        )
    }
}

/// One decoded block, tagged by id.
///
/// Flow-control variants carry no audio; they only steer the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// ID 0x10 — standard speed data, ROM timing.
    Standard {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Embedded TAP-style payload.
        data: DataRange,
        /// Pulse timing (ROM, pilot count by header/data flag).
        timing: BitTiming,
        /// Payload classification.
        content: Content,
    },
    /// ID 0x11 — turbo speed data with explicit timing.
    Turbo {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Embedded payload.
        data: DataRange,
        /// Pulse timing from the block header.
        timing: BitTiming,
        /// Used bits in the final byte, 1–8.
        used_bits: u8,
        /// Payload classification.
        content: Content,
    },
    /// ID 0x12 — pure tone.
    PureTone {
        /// Half-pulse length, T-states.
        pulse_len: u16,
        /// Number of half-pulses.
        pulse_count: u16,
    },
    /// ID 0x13 — explicit sequence of half-pulse lengths.
    PulseSequence {
        /// Half-pulse lengths, T-states.
        pulses: Vec<u16>,
    },
    /// ID 0x14 — pure data: bit tones without pilot or sync.
    PureData {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Embedded payload.
        data: DataRange,
        /// "0" bit half-pulse, T-states.
        bit0: u16,
        /// "1" bit half-pulse, T-states.
        bit1: u16,
        /// Used bits in the final byte, 1–8.
        used_bits: u8,
    },
    /// ID 0x15 — direct recording: bit-sampled levels.
    DirectRecording {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Sampled payload.
        data: DataRange,
        /// T-states per sample; output rate is CPU_HZ divided by this.
        tstates_per_sample: u16,
        /// Used samples in the final byte, 1–8.
        used_bits: u8,
    },
    /// ID 0x18 — CSW recording, decompressed to run-length pulses.
    Csw {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// CSW sampling rate the pulse lengths are expressed in, Hz.
        sample_rate: u32,
        /// Decompressed pulse runs.
        pulses: Vec<CswPulse>,
    },
    /// ID 0x19 — generalized data block.
    Generalized {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Symbol tables and bit-packed stream.
        gdb: GdbBlock,
    },
    /// ID 0x20 — pause, or stop-the-tape when the duration is zero.
    PauseOrStop {
        /// Pause duration, milliseconds. Zero requests a hard stop.
        duration_ms: u32,
    },
    /// ID 0x21 — group start with its label.
    GroupStart {
        /// Group label.
        name: String,
    },
    /// ID 0x22 — group end.
    GroupEnd,
    /// ID 0x24 — loop start.
    LoopStart {
        /// Times the loop body repeats.
        repetitions: u16,
    },
    /// ID 0x25 — loop end.
    LoopEnd,
    /// ID 0x28 — select block; options are skipped, playback continues.
    SelectBlock,
    /// ID 0x2A — stop the tape in 48k mode; ignored during playback.
    StopTape48k,
    /// ID 0x2B — set signal level.
    SetSignalLevel {
        /// 0 = low, 1 = high.
        level: u8,
    },
    /// ID 0x30 — text description.
    TextDescription {
        /// Description text.
        text: String,
    },
    /// ID 0x31 — message to display during loading.
    Message {
        /// Seconds the message should stay visible.
        display_s: u8,
        /// Message text.
        text: String,
    },
    /// ID 0x32 — archive info; contents skipped.
    ArchiveInfo,
    /// ID 0x33 — hardware type list; contents skipped.
    HardwareType,
    /// ID 0x35 — custom info; contents skipped.
    CustomInfo,
    /// ID 0x4B — TSX Kansas City block (MSX-style byte framing).
    KansasCity {
        /// Pause after the block, milliseconds.
        pause_ms: u32,
        /// Embedded payload.
        data: DataRange,
        /// Pilot half-pulse length, T-states.
        pilot_len: u16,
        /// Number of pilot half-pulses.
        pilot_pulses: u16,
        /// "0" bit half-pulse, T-states.
        bit0: u16,
        /// "1" bit half-pulse, T-states.
        bit1: u16,
        /// Packed pulse counts: high nibble zero-bit, low nibble one-bit.
        bit_cfg: u8,
        /// Packed leading/trailing bit configuration.
        byte_cfg: u8,
    },
    /// ID 0x5A — glue block between concatenated tapes.
    Glue,
}

impl BlockKind {
    /// Whether playback logic exists for this block.
    pub fn playable(&self) -> bool {
        matches!(
            self,
            BlockKind::Standard { .. }
                | BlockKind::Turbo { .. }
                | BlockKind::PureTone { .. }
                | BlockKind::PulseSequence { .. }
                | BlockKind::PureData { .. }
                | BlockKind::DirectRecording { .. }
                | BlockKind::Csw { .. }
                | BlockKind::Generalized { .. }
                | BlockKind::KansasCity { .. }
        )
    }

    /// Silence to append after the block, milliseconds.
    pub fn pause_after_ms(&self) -> u32 {
        match self {
            BlockKind::Standard { pause_ms, .. }
            | BlockKind::Turbo { pause_ms, .. }
            | BlockKind::PureData { pause_ms, .. }
            | BlockKind::DirectRecording { pause_ms, .. }
            | BlockKind::Csw { pause_ms, .. }
            | BlockKind::Generalized { pause_ms, .. }
            | BlockKind::KansasCity { pause_ms, .. } => *pause_ms,
            _ => 0,
        }
    }

    /// Fixed display name for the block id.
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Standard { content, .. } | BlockKind::Turbo { content, .. }
                if content.is_header() =>
            {
                content.type_name()
            }
            BlockKind::Standard { .. } => "ID 10 - Standard block",
            BlockKind::Turbo { .. } => "ID 11 - Speed block",
            BlockKind::PureTone { .. } => "ID 12 - Pure tone",
            BlockKind::PulseSequence { .. } => "ID 13 - Pulse seq.",
            BlockKind::PureData { .. } => "ID 14 - Pure data",
            BlockKind::DirectRecording { .. } => "ID 15 - Direct recording",
            BlockKind::Csw { .. } => "ID 18 - CSW recording",
            BlockKind::Generalized { .. } => "ID 19 - GDB",
            BlockKind::PauseOrStop { .. } => "ID 20 - Pause or Stop",
            BlockKind::GroupStart { .. } => "ID 21 - Group start",
            BlockKind::GroupEnd => "ID 22 - Group end",
            BlockKind::LoopStart { .. } => "ID 24 - Loop start",
            BlockKind::LoopEnd => "ID 25 - Loop end",
            BlockKind::SelectBlock => "ID 28 - Select block",
            BlockKind::StopTape48k => "ID 2A - Stop TAPE (48k mode)",
            BlockKind::SetSignalLevel { .. } => "ID 2B - Set signal level",
            BlockKind::KansasCity { .. } => "ID 4B - TSX Block",
            BlockKind::Glue => "ID 5A - Glue block",
            BlockKind::TextDescription { .. }
            | BlockKind::Message { .. }
            | BlockKind::ArchiveInfo
            | BlockKind::HardwareType
            | BlockKind::CustomInfo => "Information block",
        }
    }
}

/// One entry of the descriptor store.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDescriptor {
    /// Position in the container's block sequence.
    pub index: usize,
    /// Raw block id byte (0x00 for TAP blocks).
    pub id: u8,
    /// Absolute offset of the block within the source file.
    pub offset: u64,
    /// Block size in bytes (payload for data blocks).
    pub size: u32,
    /// Name extracted from an embedded standard header or group label.
    pub name: Option<String>,
    /// Logical group this block belongs to; 0 when ungrouped.
    pub group: u16,
    /// Parsed per-id fields.
    pub kind: BlockKind,
}

impl BlockDescriptor {
    /// Whether playback logic exists for this block.
    pub fn playable(&self) -> bool {
        self.kind.playable()
    }

    /// Fixed display name for the block.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Container format a tape was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeKind {
    /// Raw TAP: length-prefixed, checksummed blocks.
    Tap,
    /// TZX and its TSX/CDT variants.
    Tzx,
}

/// A decoded tape container. Owns every descriptor and all their nested
/// buffers; dropping it releases the lot.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    /// Container format.
    pub kind: TapeKind,
    /// Program name from the first standard header, if any.
    pub name: String,
    /// Source file size in bytes.
    pub size: u64,
    /// Decoded block descriptors in file order.
    pub blocks: Vec<BlockDescriptor>,
}

impl Tape {
    /// Number of decoded blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}
