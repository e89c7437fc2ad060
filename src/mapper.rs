//! Mapper - binds physical controls to MIDI parameters
//!
//! Receives debounced hardware events (encoder position changes, button
//! edges), runs the bound mapping strategy, and emits Control Change and
//! Note messages through a [`MidiOut`] sink. Owns the per-control state:
//! last emitted value for change detection, the floating offset that
//! keeps unbounded hardware counters aligned with a bounded strategy's
//! window, and the sustained-note table.
//!
//! All methods are synchronous and bounded: `process_encoder_change`
//! emits at most one message, `update` at most one Note Off per expired
//! note. Events for a control that has no binding are silently ignored
//! (hardware can report IDs that are simply not routed to MIDI).

use crate::midi::{MidiIdentity, MidiOut};
use crate::strategy::MappingStrategy;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Opaque identifier of one physical control (encoder or button)
pub type ControlId = u16;

/// Default velocity for note-mapped buttons
pub const DEFAULT_VELOCITY: u8 = 127;

/// Note behavior for a button binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteOptions {
    /// Note On velocity (0-127)
    pub velocity: u8,
    /// Auto-release after this many milliseconds; None = hold until
    /// the button is released
    pub duration_ms: Option<u64>,
    /// Whether a press while the note is already sustained re-triggers
    /// it (Note Off then Note On) instead of being ignored
    pub retrigger: bool,
}

impl Default for NoteOptions {
    fn default() -> Self {
        Self {
            velocity: DEFAULT_VELOCITY,
            duration_ms: None,
            retrigger: false,
        }
    }
}

/// Per-control binding state
#[derive(Debug)]
struct MappingEntry {
    identity: MidiIdentity,
    strategy: MappingStrategy,
    note: NoteOptions,
    /// Last MIDI value emitted (change-detection baseline and the
    /// "previous value" input to strategies)
    last_midi_value: u8,
    /// Last raw physical value observed; None until the first sample
    last_physical: Option<i32>,
    /// Floating offset for bounded strategies: the strategy sees
    /// `position - offset`
    offset: i32,
}

/// A note currently sustained, keyed by its control
#[derive(Debug, Clone, Copy)]
struct ActiveNote {
    channel: u8,
    note: u8,
    /// Absolute expiry timestamp (ms); None = waits for release
    expires_at_ms: Option<u64>,
}

/// Binds controls to strategies and emits MIDI on hardware events
#[derive(Debug, Default)]
pub struct Mapper {
    mappings: HashMap<ControlId, MappingEntry>,
    active_notes: HashMap<ControlId, ActiveNote>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the binding for a control
    ///
    /// Takes ownership of the strategy; any previous binding for the
    /// control is replaced wholesale. Channel/number are expected to be
    /// pre-validated by the caller.
    pub fn set_mapping(
        &mut self,
        control: ControlId,
        identity: MidiIdentity,
        strategy: MappingStrategy,
    ) {
        self.set_mapping_with_options(control, identity, strategy, NoteOptions::default());
    }

    /// Install or replace a binding with explicit note behavior
    pub fn set_mapping_with_options(
        &mut self,
        control: ControlId,
        identity: MidiIdentity,
        strategy: MappingStrategy,
        note: NoteOptions,
    ) {
        debug!(control, %identity, strategy = strategy.name(), "set mapping");
        self.mappings.insert(
            control,
            MappingEntry {
                identity,
                strategy,
                note,
                last_midi_value: 0,
                last_physical: None,
                offset: 0,
            },
        );
    }

    /// Remove the binding for a control
    ///
    /// Returns false if the control had no binding. A note still
    /// sustained by the control is released immediately: once the
    /// binding is gone no release event can reach it anymore.
    pub fn remove_mapping(&mut self, out: &mut impl MidiOut, control: ControlId) -> bool {
        if let Some(active) = self.active_notes.remove(&control) {
            out.send_note_off(active.channel, active.note, 0);
            debug!(control, note = active.note, "note released on unbind");
        }
        self.mappings.remove(&control).is_some()
    }

    /// Whether a control has a binding
    pub fn has_mapping(&self, control: ControlId) -> bool {
        self.mappings.contains_key(&control)
    }

    /// MIDI identity bound to a control
    ///
    /// Returns CC 0 on channel 0 when the control is unbound, so hot
    /// paths never branch on a fallible lookup.
    pub fn midi_identity(&self, control: ControlId) -> MidiIdentity {
        self.mappings
            .get(&control)
            .map(|entry| entry.identity)
            .unwrap_or_else(|| MidiIdentity::cc(0, 0))
    }

    /// Number of currently sustained notes
    pub fn active_note_count(&self) -> usize {
        self.active_notes.len()
    }

    /// Process an encoder's new absolute position
    ///
    /// Emits at most one Control Change: the bound strategy encodes the
    /// position, and the result is sent only if it differs from the last
    /// value emitted for this control. The first sample of a control
    /// establishes its physical reference and emits nothing.
    pub fn process_encoder_change(
        &mut self,
        out: &mut impl MidiOut,
        control: ControlId,
        position: i32,
        now_ms: u64,
    ) {
        let Some(entry) = self.mappings.get_mut(&control) else {
            return;
        };

        if entry.last_physical.is_none() {
            // Hardware counters start at arbitrary values; the first
            // report is a baseline, not a movement.
            entry.last_physical = Some(position);
            entry.strategy.set_reference(position, now_ms);
            if let Some((lower, _)) = entry.strategy.physical_window() {
                entry.offset = position.wrapping_sub(lower);
            }
            trace!(control, position, "encoder reference primed");
            return;
        }

        let adjusted = match entry.strategy.physical_window() {
            Some((lower, upper)) => {
                // Pin the adjusted position to the window edges and let
                // the offset absorb any overshoot, so a continuous turn
                // never jumps. All arithmetic wraps: hardware counters
                // wrap, and the offset tracks them modulo 2^32.
                let mut adjusted = position.wrapping_sub(entry.offset);
                if adjusted < lower {
                    entry.offset = entry.offset.wrapping_add(adjusted.wrapping_sub(lower));
                    adjusted = lower;
                } else if adjusted > upper {
                    entry.offset = entry.offset.wrapping_add(adjusted.wrapping_sub(upper));
                    adjusted = upper;
                }
                adjusted
            }
            None => position,
        };

        let value = entry
            .strategy
            .encode(adjusted, entry.last_midi_value, now_ms);
        entry.last_physical = Some(position);

        if value == entry.last_midi_value {
            return;
        }
        entry.last_midi_value = value;

        trace!(control, value, identity = %entry.identity, "encoder change");
        out.send_cc(entry.identity.channel, entry.identity.number, value);
    }

    /// Process an encoder's integrated push button
    pub fn process_encoder_button(
        &mut self,
        out: &mut impl MidiOut,
        control: ControlId,
        pressed: bool,
        now_ms: u64,
    ) {
        self.process_button_press(out, control, pressed, now_ms);
    }

    /// Process a button edge
    ///
    /// Press dispatches Note On (velocity from the binding's options)
    /// and registers the sustained note; release dispatches Note Off and
    /// removes it. A duration-bounded note registers an expiry instead
    /// of waiting for release. At most one note is ever active per
    /// control.
    pub fn process_button_press(
        &mut self,
        out: &mut impl MidiOut,
        control: ControlId,
        pressed: bool,
        now_ms: u64,
    ) {
        let Some(entry) = self.mappings.get(&control) else {
            return;
        };
        let channel = entry.identity.channel;
        let note = entry.identity.number;
        let options = entry.note;

        if pressed {
            if let Some(active) = self.active_notes.get(&control) {
                if !options.retrigger {
                    return;
                }
                // Retrigger: close the sustained note before restarting it
                out.send_note_off(active.channel, active.note, 0);
            }
            out.send_note_on(channel, note, options.velocity);
            self.active_notes.insert(
                control,
                ActiveNote {
                    channel,
                    note,
                    expires_at_ms: options.duration_ms.map(|d| now_ms + d),
                },
            );
            debug!(control, channel, note, velocity = options.velocity, "note on");
        } else {
            match self.active_notes.remove(&control) {
                Some(active) => {
                    out.send_note_off(active.channel, active.note, 0);
                    debug!(control, channel = active.channel, note = active.note, "note off");
                }
                None => {
                    // The press may have expired or been missed; still
                    // release so the receiver cannot stay wedged.
                    out.send_note_off(channel, note, 0);
                }
            }
        }
    }

    /// Expire duration-bounded notes
    ///
    /// Must be called on every processing tick regardless of input
    /// activity; expiry is checked here, not by a timer. Each expired
    /// note gets exactly one Note Off.
    pub fn update(&mut self, out: &mut impl MidiOut, now_ms: u64) {
        self.active_notes.retain(|control, active| {
            match active.expires_at_ms {
                Some(expiry) if now_ms >= expiry => {
                    out.send_note_off(active.channel, active.note, 0);
                    debug!(control, note = active.note, "note expired");
                    false
                }
                _ => true,
            }
        });
    }
}
