//! Playback orchestration.
//!
//! The player walks the descriptor store in order, dispatching each block
//! to its rendering logic and honouring stop/pause requests between
//! sample chunks. Loop blocks redirect the walk (one level of nesting —
//! a loop start inside an active loop overwrites the saved position),
//! group and info blocks pass through, and a zero-duration pause block
//! performs the hard auto-pause transition by re-issuing the pause
//! command through the same control the player is driven by.
//!
//! Large data payloads are streamed in fixed-size partitions: only the
//! first partition carries the pilot tone and sync pulses, only the last
//! is followed by the trailing silence, and the used-bits mask applies
//! only to the very last byte of the very last partition.

mod control;

pub use control::{EventHandler, PlaybackState, PlayerEvent, TapeControl};

use crate::blocks::{BitTiming, BlockDescriptor, BlockKind, DataRange, Tape};
use crate::consts::{self, SPLIT_DATA_BYTES};
use crate::parser::csw::CswPulse;
use crate::parser::gdb::{GdbBlock, SymbolDef};
use crate::sink::AudioSink;
use crate::storage::{read_range, TapeSource};
use crate::synth::{Advance, Level, Polarity, PulseSynth, SynthConfig};
use crate::{Result, TapeError};

/// Tape playback engine over a decoded container and its byte source.
pub struct Player<S: TapeSource> {
    tape: Tape,
    source: S,
    synth: PulseSynth,
    control: TapeControl,
    handler: Option<EventHandler>,
    current_block: usize,
    last_silence_ms: u32,
}

impl<S: TapeSource> Player<S> {
    /// Player with the default synthesizer configuration.
    pub fn new(tape: Tape, source: S) -> Self {
        Self::with_config(tape, source, SynthConfig::default())
    }

    /// Player with an explicit synthesizer configuration.
    pub fn with_config(tape: Tape, source: S, config: SynthConfig) -> Self {
        Player {
            tape,
            source,
            synth: PulseSynth::new(config),
            control: TapeControl::new(),
            handler: None,
            current_block: 0,
            last_silence_ms: 0,
        }
    }

    /// Shared control handle for this player.
    pub fn control(&self) -> TapeControl {
        self.control.clone()
    }

    /// The decoded container being played.
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Index of the block playback is at (or will resume from).
    pub fn current_block(&self) -> usize {
        self.current_block
    }

    /// Position playback on a specific block.
    pub fn select_block(&mut self, index: usize) {
        self.current_block = index.min(self.tape.num_blocks().saturating_sub(1));
    }

    /// Register the status observer.
    pub fn on_event(&mut self, handler: EventHandler) {
        self.handler = Some(handler);
    }

    fn emit(&mut self, event: PlayerEvent) {
        if let Some(handler) = self.handler.as_mut() {
            handler(&event);
        }
    }

    /// Play from the current block until the tape ends or a request stops
    /// it. Returns the state playback settled in: `Idle` after a stop or
    /// the end of the tape, `Paused` after a pause.
    pub fn play<K: AudioSink>(&mut self, sink: &mut K) -> Result<PlaybackState> {
        if self.tape.blocks.is_empty() {
            log::warn!("play requested with no blocks loaded");
            return Ok(PlaybackState::Idle);
        }

        self.control.set_state(PlaybackState::Playing);

        let mut loop_start = 0usize;
        let mut loop_count = 0u16;
        let mut loop_played = 0u16;

        let mut i = self.current_block.min(self.tape.num_blocks() - 1);

        while i < self.tape.num_blocks() {
            if self.control.poll() {
                break;
            }

            self.current_block = i;
            let block = &self.tape.blocks[i];
            let started = PlayerEvent::BlockStarted {
                index: i,
                name: block.name.clone(),
                type_name: block.type_name(),
                size: block.size,
            };
            self.emit(started);

            // Each block is its own timing unit
            self.synth.reset_accumulator();

            enum Step {
                LoopStart(u16),
                LoopEnd,
                Signal(u8),
                Pause(u32),
                Skip,
                Play,
            }

            let step = match &self.tape.blocks[i].kind {
                BlockKind::LoopStart { repetitions } => Step::LoopStart(*repetitions),
                BlockKind::LoopEnd => Step::LoopEnd,
                BlockKind::SetSignalLevel { level } => Step::Signal(*level),
                BlockKind::PauseOrStop { duration_ms } => Step::Pause(*duration_ms),
                kind if !kind.playable() => Step::Skip,
                _ => Step::Play,
            };

            match step {
                Step::LoopStart(repetitions) => {
                    loop_start = i;
                    loop_count = repetitions;
                    loop_played = 0;
                    i += 1;
                    continue;
                }
                Step::LoopEnd => {
                    loop_played += 1;
                    if loop_played < loop_count {
                        i = loop_start + 1;
                    } else {
                        loop_count = 0;
                        i += 1;
                    }
                    continue;
                }
                Step::Signal(level) => {
                    let level = if level == 0 { Level::Low } else { Level::High };
                    self.synth.set_level(level);
                    i += 1;
                    continue;
                }
                Step::Pause(0) => {
                    // Hard transition: not a playable pulse. Advance the
                    // cursor, pause ourselves through our own control and
                    // report it.
                    let mut next = i + 1;
                    if next >= self.tape.num_blocks() {
                        next = 0;
                    }
                    self.current_block = next;

                    self.control.request_pause();
                    self.control.poll();
                    self.control.clear_requests();
                    self.control.set_state(PlaybackState::Paused);
                    self.emit(PlayerEvent::AutoPause);
                    log::info!("stop-the-tape block: auto-pause before block {}", next);
                    return Ok(PlaybackState::Paused);
                }
                Step::Pause(duration) => {
                    let ctrl = self.control.clone();
                    self.synth.silence_ms(duration, sink, &ctrl)?;
                    self.last_silence_ms = duration;
                    i += 1;
                    continue;
                }
                Step::Skip => {
                    // Group, select, info and glue blocks carry no audio
                    i += 1;
                    continue;
                }
                Step::Play => {}
            }

            let ctrl = self.control.clone();
            let Player {
                tape,
                source,
                synth,
                last_silence_ms,
                ..
            } = self;
            let advance = play_block(
                &tape.blocks[i],
                source,
                synth,
                sink,
                &ctrl,
                last_silence_ms,
            )?;

            match advance {
                Advance::Completed => i += 1,
                Advance::Interrupted => break,
            }
        }

        match self.control.state() {
            PlaybackState::StopRequested => {
                self.control.clear_requests();
                self.control.set_state(PlaybackState::Idle);
                self.emit(PlayerEvent::Stopped);
                log::info!("playback stopped at block {}", self.current_block);
                Ok(PlaybackState::Idle)
            }
            PlaybackState::PauseRequested => {
                self.control.clear_requests();
                self.control.set_state(PlaybackState::Paused);
                self.emit(PlayerEvent::Paused);
                log::info!("playback paused at block {}", self.current_block);
                Ok(PlaybackState::Paused)
            }
            _ => {
                // Ran off the end of the descriptor array: automatic stop.
                // A missing tail pulse would leave the final edge unseen, so
                // when the last block carried no pause, append one second.
                if self.last_silence_ms == 0 {
                    let tail_ms = (f64::from(consts::PAUSE_TAIL_TSTATES)
                        / f64::from(consts::CPU_HZ)
                        * 1000.0)
                        .round() as u32;
                    let ctrl = self.control.clone();
                    self.synth.silence_ms(tail_ms, sink, &ctrl)?;
                }
                self.current_block = 0;
                self.control.clear_requests();
                self.control.set_state(PlaybackState::Idle);
                self.emit(PlayerEvent::AutoStop);
                log::info!("end of tape: automatic stop");
                Ok(PlaybackState::Idle)
            }
        }
    }
}

/// Render one playable block.
fn play_block<S: TapeSource, K: AudioSink>(
    block: &BlockDescriptor,
    source: &mut S,
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    match &block.kind {
        BlockKind::Standard {
            pause_ms,
            data,
            timing,
            ..
        } => play_bit_data(
            source,
            synth,
            sink,
            ctrl,
            *data,
            Some(*timing),
            timing.bit0,
            timing.bit1,
            8,
            *pause_ms,
            last_silence_ms,
        ),
        BlockKind::Turbo {
            pause_ms,
            data,
            timing,
            used_bits,
            ..
        } => play_bit_data(
            source,
            synth,
            sink,
            ctrl,
            *data,
            Some(*timing),
            timing.bit0,
            timing.bit1,
            *used_bits,
            *pause_ms,
            last_silence_ms,
        ),
        BlockKind::PureData {
            pause_ms,
            data,
            bit0,
            bit1,
            used_bits,
        } => play_bit_data(
            source, synth, sink, ctrl, *data, None, *bit0, *bit1, *used_bits, *pause_ms,
            last_silence_ms,
        ),
        BlockKind::PureTone {
            pulse_len,
            pulse_count,
        } => synth.pure_tone(*pulse_len, *pulse_count, sink, ctrl),
        BlockKind::PulseSequence { pulses } => synth.pulse_sequence(pulses, sink, ctrl),
        BlockKind::DirectRecording {
            pause_ms,
            data,
            tstates_per_sample,
            used_bits,
        } => play_direct(
            source,
            synth,
            sink,
            ctrl,
            *data,
            *tstates_per_sample,
            *used_bits,
            *pause_ms,
            last_silence_ms,
        ),
        BlockKind::Csw {
            pause_ms,
            sample_rate,
            pulses,
        } => play_csw(
            synth,
            sink,
            ctrl,
            pulses,
            *sample_rate,
            *pause_ms,
            last_silence_ms,
        ),
        BlockKind::Generalized { pause_ms, gdb } => {
            play_gdb(synth, sink, ctrl, gdb, *pause_ms, last_silence_ms)
        }
        BlockKind::KansasCity {
            pause_ms,
            data,
            pilot_len,
            pilot_pulses,
            bit0,
            bit1,
            bit_cfg,
            byte_cfg,
        } => play_kansas_city(
            source,
            synth,
            sink,
            ctrl,
            *data,
            *pilot_len,
            *pilot_pulses,
            [*bit0, *bit1],
            *bit_cfg,
            *byte_cfg,
            *pause_ms,
            last_silence_ms,
        ),
        other => {
            log::debug!("block {:?} has no audio to render", other.type_name());
            Ok(Advance::Completed)
        }
    }
}

/// Pilot/sync preamble plus bit-encoded data, streamed in partitions.
#[allow(clippy::too_many_arguments)]
fn play_bit_data<S: TapeSource, K: AudioSink>(
    source: &mut S,
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    data: DataRange,
    preamble: Option<BitTiming>,
    bit0: u16,
    bit1: u16,
    used_bits: u8,
    pause_ms: u32,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    if let Some(timing) = preamble {
        if !synth
            .pilot_tone(timing.pilot_len, timing.pilot_pulses, sink, ctrl)?
            .completed()
        {
            return Ok(Advance::Interrupted);
        }
        if !synth.sync(timing.sync1, sink, ctrl)?.completed() {
            return Ok(Advance::Interrupted);
        }
        if !synth.sync(timing.sync2, sink, ctrl)?.completed() {
            return Ok(Advance::Interrupted);
        }
    }

    let mut offset = data.offset;
    let mut remaining = data.len;
    while remaining > 0 {
        let n = remaining.min(SPLIT_DATA_BYTES);
        let bytes = read_range(source, offset, n as usize)?;
        let last_chunk = n == remaining;

        if !synth
            .data_bytes(&bytes, bit0, bit1, used_bits, last_chunk, sink, ctrl)?
            .completed()
        {
            return Ok(Advance::Interrupted);
        }
        offset += u64::from(n);
        remaining -= n;
    }

    let advance = synth.silence_ms(pause_ms, sink, ctrl)?;
    *last_silence_ms = pause_ms;
    Ok(advance)
}

/// Direct recording: override the output rate, sample the bits, restore.
#[allow(clippy::too_many_arguments)]
fn play_direct<S: TapeSource, K: AudioSink>(
    source: &mut S,
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    data: DataRange,
    tstates_per_sample: u16,
    used_bits: u8,
    pause_ms: u32,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    if tstates_per_sample == 0 {
        return Err(TapeError::InvalidSampleRate);
    }
    let rate = f64::from(synth.config().cpu_hz) / f64::from(tstates_per_sample);
    if rate <= 1.0 {
        return Err(TapeError::InvalidSampleRate);
    }
    let rate = rate.round() as u32;
    let base_rate = synth.config().sample_rate;

    sink.set_sample_rate(rate);
    synth.set_sample_rate(rate);

    let result = (|| {
        let mut offset = data.offset;
        let mut remaining = data.len;
        while remaining > 0 {
            let n = remaining.min(SPLIT_DATA_BYTES);
            let bytes = read_range(source, offset, n as usize)?;
            let last_chunk = n == remaining;

            if !synth
                .direct_bits(&bytes, used_bits, last_chunk, sink, ctrl)?
                .completed()
            {
                return Ok(Advance::Interrupted);
            }
            offset += u64::from(n);
            remaining -= n;
        }

        // Trailing silence runs at the block's own rate
        let advance = synth.silence_ms(pause_ms, sink, ctrl)?;
        *last_silence_ms = pause_ms;
        Ok(advance)
    })();

    sink.set_sample_rate(base_rate);
    synth.set_sample_rate(base_rate);
    result
}

/// CSW pulse runs, each length scaled from the CSW rate into T-states.
fn play_csw<K: AudioSink>(
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    pulses: &[CswPulse],
    sample_rate: u32,
    pause_ms: u32,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    if sample_rate == 0 {
        log::warn!("CSW block with zero sampling rate skipped");
        return Ok(Advance::Completed);
    }
    let factor = f64::from(synth.config().cpu_hz) / f64::from(sample_rate);

    for pulse in pulses {
        let tstates = (f64::from(pulse.len) * factor).round() as u32;
        if tstates == 0 {
            continue;
        }
        for _ in 0..pulse.repeat {
            synth.reset_accumulator();
            if !synth.half_pulse(tstates, sink, ctrl)?.completed() {
                return Ok(Advance::Interrupted);
            }
        }
    }

    let advance = synth.silence_ms(pause_ms, sink, ctrl)?;
    *last_silence_ms = pause_ms;
    Ok(advance)
}

/// One GDB symbol: polarity rule on the first pulse, toggles after.
fn play_symbol<K: AudioSink>(
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    def: &SymbolDef,
) -> Result<Advance> {
    let mut first = true;
    for &pulse in &def.pulses {
        if pulse == 0 {
            break;
        }
        let polarity = if first { def.polarity } else { Polarity::Toggle };
        synth.reset_accumulator();
        if !synth
            .half_pulse_with(u32::from(pulse), polarity, sink, ctrl)?
            .completed()
        {
            return Ok(Advance::Interrupted);
        }
        first = false;
    }
    Ok(Advance::Completed)
}

/// Generalized data block: pilot runs, then the symbol-indexed stream.
fn play_gdb<K: AudioSink>(
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    gdb: &GdbBlock,
    pause_ms: u32,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    synth.reset_accumulator();
    for run in &gdb.pilot_stream {
        if u16::from(run.symbol) >= gdb.asp {
            log::warn!("pilot symbol {} outside alphabet, skipped", run.symbol);
            continue;
        }
        let def = &gdb.pilot_symbols[usize::from(run.symbol)];
        for _ in 0..run.repeat {
            if !play_symbol(synth, sink, ctrl, def)?.completed() {
                return Ok(Advance::Interrupted);
            }
        }
    }

    synth.reset_accumulator();
    for index in gdb.data_symbol_indices() {
        if index >= gdb.asd {
            log::warn!("data symbol {} outside alphabet, skipped", index);
            continue;
        }
        let def = &gdb.data_symbols[usize::from(index)];
        if !play_symbol(synth, sink, ctrl, def)?.completed() {
            return Ok(Advance::Interrupted);
        }
    }

    let advance = synth.silence_ms(pause_ms, sink, ctrl)?;
    *last_silence_ms = pause_ms;
    Ok(advance)
}

/// Kansas City framing: expand each byte into leading bits, eight data
/// bits LSB first and trailing bits, all as full pulse pairs.
#[allow(clippy::too_many_arguments)]
fn play_kansas_city<S: TapeSource, K: AudioSink>(
    source: &mut S,
    synth: &mut PulseSynth,
    sink: &mut K,
    ctrl: &TapeControl,
    data: DataRange,
    pilot_len: u16,
    pilot_pulses: u16,
    bit_len: [u16; 2],
    bit_cfg: u8,
    byte_cfg: u8,
    pause_ms: u32,
    last_silence_ms: &mut u32,
) -> Result<Advance> {
    // Full pulse pairs per bit value; the nibbles count half-pulses
    let pairs = [u32::from(bit_cfg >> 4) / 2, u32::from(bit_cfg & 0x0F) / 2];
    let leading_bits = u32::from(byte_cfg >> 6);
    let leading_value = usize::from((byte_cfg >> 5) & 1);
    let trailing_bits = u32::from((byte_cfg >> 3) & 3);
    let trailing_value = usize::from((bit_cfg >> 2) & 1);

    const PARTITION: u32 = 1024;

    let mut push_bit = |pulses: &mut Vec<u16>, value: usize| {
        for _ in 0..pairs[value] {
            pulses.push(bit_len[value]);
            pulses.push(bit_len[value]);
        }
    };

    let mut offset = data.offset;
    let mut remaining = data.len;
    let mut first_partition = true;

    loop {
        let n = remaining.min(PARTITION);
        let bytes = read_range(source, offset, n as usize)?;

        let mut pulses: Vec<u16> = Vec::new();
        if first_partition {
            pulses.extend(std::iter::repeat(pilot_len).take(usize::from(pilot_pulses)));
            first_partition = false;
        }

        for &byte in &bytes {
            for _ in 0..leading_bits {
                push_bit(&mut pulses, leading_value);
            }
            for n in 0..8 {
                push_bit(&mut pulses, usize::from((byte >> n) & 1));
            }
            for _ in 0..trailing_bits {
                push_bit(&mut pulses, trailing_value);
            }
        }

        if !synth.pulse_sequence(&pulses, sink, ctrl)?.completed() {
            return Ok(Advance::Interrupted);
        }

        offset += u64::from(n);
        remaining -= n;
        if remaining == 0 {
            break;
        }
    }

    let advance = synth.silence_ms(pause_ms, sink, ctrl)?;
    *last_silence_ms = pause_ms;
    Ok(advance)
}
