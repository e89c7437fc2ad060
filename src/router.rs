//! Control router - wires hardware events through mapping to the transport
//!
//! The router owns the [`Mapper`] and the [`OutputBuffer`] and is the one
//! piece a host's control loop talks to: forward debounced hardware
//! events via `on_encoder`/`on_button`, then call `tick` once per loop
//! iteration with the raw transport. Everything runs synchronously on
//! the caller's thread; nothing here blocks, sleeps, or yields.
//!
//! Per-tick work is bounded: note expiry emits at most one Note Off per
//! sustained note, and the flush drains at most `flush_batch` messages
//! (unbounded when the high-priority hint is set), so a burst of encoder
//! samples spreads over several ticks instead of saturating the
//! transport.

use crate::config::{ConfigError, ControlsConfig};
use crate::mapper::{ControlId, Mapper};
use crate::midi::MidiOut;
use crate::output::OutputBuffer;
use tracing::debug;

/// Default number of messages drained per tick
pub const DEFAULT_FLUSH_BATCH: u16 = 8;

/// Single-threaded orchestrator of the control-to-MIDI pipeline
#[derive(Debug)]
pub struct ControlRouter {
    mapper: Mapper,
    buffer: OutputBuffer,
    flush_batch: u16,
}

impl Default for ControlRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRouter {
    pub fn new() -> Self {
        Self {
            mapper: Mapper::new(),
            buffer: OutputBuffer::new(),
            flush_batch: DEFAULT_FLUSH_BATCH,
        }
    }

    /// Router with a custom per-tick flush bound (0 = no limit)
    pub fn with_flush_batch(flush_batch: u16) -> Self {
        Self {
            flush_batch,
            ..Self::new()
        }
    }

    /// Install bindings from a parsed configuration document
    pub fn apply_config(&mut self, config: &ControlsConfig) -> Result<usize, ConfigError> {
        config.apply(&mut self.mapper)
    }

    /// Access the mapper for direct binding management
    pub fn mapper_mut(&mut self) -> &mut Mapper {
        &mut self.mapper
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Pending/drop diagnostics from the output buffer
    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Hint that queued messages should drain without pacing
    pub fn set_high_priority(&mut self, high_priority: bool) {
        self.buffer.set_high_priority(high_priority);
    }

    /// An encoder reported a new absolute position
    pub fn on_encoder(&mut self, control: ControlId, position: i32, now_ms: u64) {
        self.mapper
            .process_encoder_change(&mut self.buffer, control, position, now_ms);
    }

    /// A button changed pressed state
    pub fn on_button(&mut self, control: ControlId, pressed: bool, now_ms: u64) {
        self.mapper
            .process_button_press(&mut self.buffer, control, pressed, now_ms);
    }

    /// Run one processing tick
    ///
    /// Expires timed notes, then drains a bounded batch of coalesced
    /// messages to the raw transport. Must be called every loop
    /// iteration regardless of input activity (note expiry is
    /// time-driven). Returns the number of messages transmitted.
    pub fn tick(&mut self, out: &mut impl MidiOut, now_ms: u64) -> u16 {
        self.mapper.update(&mut self.buffer, now_ms);

        let limit = if self.buffer.high_priority() {
            0
        } else {
            self.flush_batch
        };
        let sent = self.buffer.flush(out, limit);
        if sent > 0 {
            debug!(sent, pending = self.buffer.pending_count(), "tick flushed");
        }
        sent
    }
}
