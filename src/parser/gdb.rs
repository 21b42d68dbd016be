//! Generalized Data Block (TZX ID 0x19) structures and decoding.
//!
//! A GDB defines two symbol alphabets — one for the pilot/sync stream, one
//! for the data stream — where each symbol is an arbitrary list of pulse
//! lengths plus a polarity rule for its first pulse. The pilot stream is a
//! run-length list of (symbol, repeat) pairs; the data stream packs symbol
//! indices into a bit stream, MSB first, `ceil(log2(alphabet))` bits each.

use crate::storage::{read_u16_le, read_u32_le, read_u8, TapeSource};
use crate::synth::Polarity;
use crate::{Result, TapeError};

/// One symbol definition: polarity rule plus its pulse lengths.
///
/// A zero-length pulse terminates the symbol early; trailing zeros from the
/// fixed-width table are kept so decoding stays a pure function of the
/// input bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDef {
    /// Polarity rule for the symbol's first pulse.
    pub polarity: Polarity,
    /// Pulse lengths in T-states, fixed table width.
    pub pulses: Vec<u16>,
}

/// One pilot-stream run: a symbol repeated whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PilotRun {
    /// Index into the pilot symbol table.
    pub symbol: u8,
    /// Whole-symbol repetitions.
    pub repeat: u16,
}

/// Decoded generalized data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdbBlock {
    /// Total pilot-stream runs.
    pub totp: u32,
    /// Maximum pulses per pilot symbol.
    pub npp: u8,
    /// Pilot alphabet size (stored 0 means 256).
    pub asp: u16,
    /// Total data-stream symbols.
    pub totd: u32,
    /// Maximum pulses per data symbol.
    pub npd: u8,
    /// Data alphabet size (stored 0 means 256).
    pub asd: u16,
    /// Pilot symbol table, `asp` entries.
    pub pilot_symbols: Vec<SymbolDef>,
    /// Pilot stream, `totp` runs.
    pub pilot_stream: Vec<PilotRun>,
    /// Data symbol table, `asd` entries.
    pub data_symbols: Vec<SymbolDef>,
    /// Bit-packed data stream.
    pub data_stream: Vec<u8>,
}

impl GdbBlock {
    /// Bits per data symbol: smallest NB with `2^NB >= asd`.
    pub fn bits_per_symbol(&self) -> u32 {
        let mut nb = 0u32;
        let mut temp = self.asd;
        while temp > 1 {
            temp >>= 1;
            nb += 1;
        }
        if (1u32 << nb) < u32::from(self.asd) {
            nb += 1;
        }
        nb
    }

    /// Bytes the packed data stream occupies.
    pub fn data_stream_len(&self) -> usize {
        ((self.bits_per_symbol() as usize * self.totd as usize) + 7) / 8
    }

    /// Unpack the data stream into symbol indices, MSB first.
    pub fn data_symbol_indices(&self) -> Vec<u16> {
        let nb = self.bits_per_symbol();
        let max_bits = nb as usize * self.totd as usize;
        let mut indices = Vec::with_capacity(self.totd as usize);
        let mut bit_index = 0usize;

        while indices.len() < self.totd as usize && bit_index < max_bits {
            let mut symbol = 0u16;
            for _ in 0..nb {
                let byte = self.data_stream[bit_index / 8];
                let bit = (byte >> (7 - (bit_index % 8))) & 1;
                symbol = (symbol << 1) | u16::from(bit);
                bit_index += 1;
            }
            indices.push(symbol);
        }
        indices
    }
}

fn read_symbol_table<S: TapeSource>(
    source: &mut S,
    offset: &mut u64,
    end: u64,
    count: u16,
    pulses_per_symbol: u8,
    block: usize,
) -> Result<Vec<SymbolDef>> {
    let mut table = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if *offset + 1 > end {
            return Err(TapeError::Corrupted {
                block,
                offset: *offset,
            });
        }
        let flags = read_u8(source, *offset)?;
        *offset += 1;

        let mut pulses = Vec::with_capacity(pulses_per_symbol as usize);
        for _ in 0..pulses_per_symbol {
            if *offset + 2 > end {
                return Err(TapeError::Corrupted {
                    block,
                    offset: *offset,
                });
            }
            pulses.push(read_u16_le(source, *offset)?);
            *offset += 2;
        }

        table.push(SymbolDef {
            polarity: Polarity::from_flags(flags),
            pulses,
        });
    }
    Ok(table)
}

/// Decode a GDB at `off` (the ID byte) with the given declared length.
///
/// `block` is the descriptor index, used in corruption reports.
pub fn decode<S: TapeSource>(
    source: &mut S,
    off: u64,
    block_len: u32,
    block: usize,
) -> Result<GdbBlock> {
    let end = off + 5 + u64::from(block_len);

    let totp = read_u32_le(source, off + 7)?;
    let npp = read_u8(source, off + 11)?;
    let asp = match read_u8(source, off + 12)? {
        0 => 256u16,
        n => u16::from(n),
    };
    let totd = read_u32_le(source, off + 13)?;
    let npd = read_u8(source, off + 17)?;
    let asd = match read_u8(source, off + 18)? {
        0 => 256u16,
        n => u16::from(n),
    };

    let mut offset = off + 19;

    let (pilot_symbols, pilot_stream) = if totp > 0 {
        let symbols = read_symbol_table(source, &mut offset, end, asp, npp, block)?;
        let mut stream = Vec::with_capacity(totp as usize);
        for _ in 0..totp {
            if offset + 3 > end {
                return Err(TapeError::Corrupted { block, offset });
            }
            let symbol = read_u8(source, offset)?;
            let repeat = read_u16_le(source, offset + 1)?;
            offset += 3;
            stream.push(PilotRun { symbol, repeat });
        }
        (symbols, stream)
    } else {
        (Vec::new(), Vec::new())
    };

    let data_symbols = if totd > 0 {
        read_symbol_table(source, &mut offset, end, asd, npd, block)?
    } else {
        Vec::new()
    };

    let mut gdb = GdbBlock {
        totp,
        npp,
        asp,
        totd,
        npd,
        asd,
        pilot_symbols,
        pilot_stream,
        data_symbols,
        data_stream: Vec::new(),
    };

    // The packed stream occupies the final DS bytes of the block
    let ds = gdb.data_stream_len();
    if ds > 0 {
        let stream_off = end
            .checked_sub(ds as u64)
            .ok_or(TapeError::Corrupted { block, offset })?;
        if stream_off < offset {
            return Err(TapeError::Corrupted {
                block,
                offset: stream_off,
            });
        }
        gdb.data_stream = crate::storage::read_range(source, stream_off, ds)?;
    }

    Ok(gdb)
}
