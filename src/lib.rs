//! midimap - control-to-MIDI translation core for hardware controllers
//!
//! Converts raw hardware input samples (rotary encoder positions, button
//! edges) into outbound MIDI Control Change and Note messages, and
//! coalesces/paces those messages onto a bandwidth-constrained transport.
//!
//! The crate is a synchronous library driven by a caller-owned control
//! loop: feed events into [`router::ControlRouter`], call
//! [`router::ControlRouter::tick`] once per loop iteration, and implement
//! [`midi::MidiOut`] over your transport. Hardware sampling/debouncing,
//! display rendering and configuration persistence are the host's
//! concern.

pub mod config;
pub mod mapper;
pub mod midi;
pub mod output;
pub mod router;
pub mod strategy;

pub use config::{ConfigError, ControlsConfig};
pub use mapper::{ControlId, Mapper, NoteOptions};
pub use midi::{MidiIdentity, MidiKind, MidiMessage, MidiOut};
pub use output::OutputBuffer;
pub use router::ControlRouter;
pub use strategy::{MappingStrategy, RelativeEncoding};
