//! Real-time audio output over a ring buffer.
//!
//! The player thread pushes samples into a [`StreamingSink`]; the audio
//! device drains them from the shared [`RingBuffer`]. When the buffer is
//! full the sink blocks with a short backoff, which is exactly the
//! synchronous, fire-and-forget behaviour the synthesizer expects — it
//! polls for stop/pause between chunks, never inside one.

use crate::sink::AudioSink;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Microseconds to back off when the ring buffer is full.
pub const BUFFER_BACKOFF_MICROS: u64 = 500;

/// Stream configuration.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Output sample rate, Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Ring buffer capacity in samples.
    pub ring_buffer_size: usize,
}

impl StreamConfig {
    /// Small buffer for low-latency interactive playback.
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            channels: 2,
            ring_buffer_size: 4096,
        }
    }

    /// Large buffer favouring glitch-free output.
    pub fn stable(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            channels: 2,
            ring_buffer_size: 32768,
        }
    }

    /// Buffer latency in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        let frames = self.ring_buffer_size as f32 / f32::from(self.channels);
        frames / self.sample_rate as f32 * 1000.0
    }
}

/// Fixed-capacity sample ring shared between producer and audio device.
pub struct RingBuffer {
    buffer: Vec<i16>,
    read: usize,
    write: usize,
    filled: usize,
}

impl RingBuffer {
    /// Ring with the given capacity in samples.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            buffer: vec![0; capacity.max(2)],
            read: 0,
            write: 0,
            filled: 0,
        }
    }

    /// Write as many samples as fit; returns how many were accepted.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let capacity = self.buffer.len();
        let free = capacity - self.filled;
        let n = samples.len().min(free);
        for &sample in &samples[..n] {
            self.buffer[self.write] = sample;
            self.write = (self.write + 1) % capacity;
        }
        self.filled += n;
        n
    }

    /// Pop one sample, or `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<i16> {
        if self.filled == 0 {
            return None;
        }
        let sample = self.buffer[self.read];
        self.read = (self.read + 1) % self.buffer.len();
        self.filled -= 1;
        Some(sample)
    }

    /// Samples that can be written without blocking.
    pub fn available_write(&self) -> usize {
        self.buffer.len() - self.filled
    }

    /// Fill ratio, 0.0 to 1.0.
    pub fn fill_percentage(&self) -> f32 {
        self.filled as f32 / self.buffer.len() as f32
    }

    /// Discard all pending samples.
    pub fn flush(&mut self) {
        self.read = 0;
        self.write = 0;
        self.filled = 0;
    }
}

/// Audio sink feeding the shared ring buffer with backpressure.
pub struct StreamingSink {
    buffer: Arc<Mutex<RingBuffer>>,
    config: StreamConfig,
}

impl StreamingSink {
    /// Sink over a fresh ring buffer.
    pub fn new(config: StreamConfig) -> Self {
        StreamingSink {
            buffer: Arc::new(Mutex::new(RingBuffer::new(config.ring_buffer_size))),
            config,
        }
    }

    /// Handle to the shared ring for the audio device.
    pub fn buffer(&self) -> Arc<Mutex<RingBuffer>> {
        Arc::clone(&self.buffer)
    }

    /// The stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl AudioSink for StreamingSink {
    fn set_sample_rate(&mut self, rate: u32) {
        if rate != self.config.sample_rate {
            log::warn!(
                "streaming sink keeps {} Hz; device rate change to {} Hz unsupported",
                self.config.sample_rate,
                rate
            );
        }
    }

    fn write(&mut self, interleaved: &[i16]) -> Result<()> {
        let mut remaining = interleaved;
        while !remaining.is_empty() {
            let written = self.buffer.lock().write(remaining);
            if written == 0 {
                std::thread::sleep(std::time::Duration::from_micros(BUFFER_BACKOFF_MICROS));
            } else {
                remaining = &remaining[written..];
            }
        }
        Ok(())
    }
}

/// Iterator the audio backend drains; silence when the ring runs dry.
struct RingSource {
    buffer: Arc<Mutex<RingBuffer>>,
    sample_rate: u32,
    channels: u16,
}

impl Iterator for RingSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        Some(self.buffer.lock().pop().unwrap_or(0))
    }
}

impl rodio::Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Keeps the OS audio stream alive while samples play.
pub struct AudioDevice {
    _stream: rodio::OutputStream,
    _handle: rodio::OutputStreamHandle,
}

impl AudioDevice {
    /// Open the default output device and start draining the ring.
    pub fn new(config: StreamConfig, buffer: Arc<Mutex<RingBuffer>>) -> Result<Self> {
        let (stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| format!("Failed to open audio device: {}", e))?;

        let source = RingSource {
            buffer,
            sample_rate: config.sample_rate,
            channels: config.channels,
        };
        handle
            .play_raw(rodio::source::Source::convert_samples(source))
            .map_err(|e| format!("Failed to start audio stream: {}", e))?;

        Ok(AudioDevice {
            _stream: stream,
            _handle: handle,
        })
    }
}
