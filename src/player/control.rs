//! Shared playback control state and status reporting.
//!
//! The orchestrator, the synthesizer's chunk loops and the embedding
//! application all see the same [`TapeControl`]: a cloneable handle over
//! one lock-protected request/state pair. Requests flow in through the
//! `request_*` methods; status flows out through [`PlayerEvent`]s delivered
//! to the observer callback registered on the player.

use crate::synth::StopCheck;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    /// Pending control requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Requests: u8 {
        const STOP  = 0b0001;
        const PAUSE = 0b0010;
        const ABORT = 0b0100;
    }
}

/// Playback state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing is playing.
    Idle,
    /// Blocks are being rendered.
    Playing,
    /// A stop request is being honoured; the current block is unwinding.
    StopRequested,
    /// A pause request is being honoured; the current block is unwinding.
    PauseRequested,
    /// Playback is paused; the current block index is kept for resume.
    Paused,
}

#[derive(Debug)]
struct Inner {
    state: PlaybackState,
    requests: Requests,
}

/// Cloneable control handle shared between the player and the application.
#[derive(Clone)]
pub struct TapeControl {
    inner: Arc<Mutex<Inner>>,
    decode_abort: Arc<AtomicBool>,
}

impl Default for TapeControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TapeControl {
    /// Fresh control handle in the idle state.
    pub fn new() -> Self {
        TapeControl {
            inner: Arc::new(Mutex::new(Inner {
                state: PlaybackState::Idle,
                requests: Requests::empty(),
            })),
            decode_abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.inner.lock().state = state;
    }

    /// Request playback; clears any pending stop or pause.
    pub fn request_play(&self) {
        let mut inner = self.inner.lock();
        inner.requests = Requests::empty();
        self.decode_abort.store(false, Ordering::Relaxed);
    }

    /// Request a pause at the next chunk boundary.
    pub fn request_pause(&self) {
        self.inner.lock().requests.insert(Requests::PAUSE);
    }

    /// Request a stop at the next chunk boundary.
    pub fn request_stop(&self) {
        self.inner.lock().requests.insert(Requests::STOP);
    }

    /// Request an abort: stops playback and any in-flight decode.
    pub fn request_abort(&self) {
        self.inner.lock().requests.insert(Requests::ABORT);
        self.decode_abort.store(true, Ordering::Relaxed);
    }

    /// Abort flag suitable for handing to a decoder.
    pub fn decode_abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.decode_abort)
    }

    /// Whether a stop or pause is pending, recording the transition.
    ///
    /// Stop wins over pause when both are pending.
    pub(crate) fn poll(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner
            .requests
            .intersects(Requests::STOP | Requests::ABORT)
        {
            inner.state = PlaybackState::StopRequested;
            true
        } else if inner.requests.contains(Requests::PAUSE) {
            inner.state = PlaybackState::PauseRequested;
            true
        } else {
            false
        }
    }

    /// Clear pending requests once they have been honoured.
    pub(crate) fn clear_requests(&self) {
        self.inner.lock().requests = Requests::empty();
    }
}

impl StopCheck for TapeControl {
    fn interrupt_requested(&self) -> bool {
        self.poll()
    }
}

/// Status reported to the observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A block is about to render.
    BlockStarted {
        /// Descriptor index.
        index: usize,
        /// Extracted block name, if any.
        name: Option<String>,
        /// Fixed block type name.
        type_name: &'static str,
        /// Block size in bytes.
        size: u32,
    },
    /// A zero-duration pause block paused the tape by itself.
    AutoPause,
    /// The descriptor array ended without a manual stop.
    AutoStop,
    /// A user stop request was honoured.
    Stopped,
    /// A user pause request was honoured.
    Paused,
}

/// Observer callback receiving [`PlayerEvent`]s.
pub type EventHandler = Box<dyn FnMut(&PlayerEvent) + Send>;
