//! MIDI message types and the output sink contract
//!
//! Provides the message kinds this core emits (Control Change, Note On,
//! Note Off), the logical identity used for coalescing, wire encoding,
//! and the `MidiOut` trait implemented by transports and by the
//! write-coalescing buffer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of MIDI message emitted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiKind {
    /// Control Change: channel (0-15), controller (0-127), value (0-127)
    #[serde(rename = "cc")]
    ControlChange,
    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn,
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff,
}

impl fmt::Display for MidiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiKind::ControlChange => write!(f, "cc"),
            MidiKind::NoteOn => write!(f, "note_on"),
            MidiKind::NoteOff => write!(f, "note_off"),
        }
    }
}

/// Logical address of an outbound MIDI parameter
///
/// Two messages with the same identity target the same slot on the
/// receiver; the output buffer deduplicates against this triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiIdentity {
    /// Message kind
    pub kind: MidiKind,
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Controller or note number (0-127)
    pub number: u8,
}

impl MidiIdentity {
    /// Control Change identity
    pub fn cc(channel: u8, number: u8) -> Self {
        Self {
            kind: MidiKind::ControlChange,
            channel,
            number,
        }
    }

    /// Note identity (addressed as Note On; the note lifecycle derives
    /// the matching Note Off)
    pub fn note(channel: u8, number: u8) -> Self {
        Self {
            kind: MidiKind::NoteOn,
            channel,
            number,
        }
    }
}

impl fmt::Display for MidiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ch:{} n:{}", self.kind, self.channel, self.number)
    }
}

/// A complete outbound MIDI message (identity + 7-bit payload)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    pub identity: MidiIdentity,
    /// Value for CC, velocity for notes (0-127)
    pub value: u8,
}

impl MidiMessage {
    /// Encode the message to wire bytes
    pub fn encode(&self) -> [u8; 3] {
        let MidiIdentity {
            kind,
            channel,
            number,
        } = self.identity;
        let status = match kind {
            MidiKind::NoteOff => 0x80,
            MidiKind::NoteOn => 0x90,
            MidiKind::ControlChange => 0xB0,
        };
        [status | (channel & 0x0F), number & 0x7F, self.value & 0x7F]
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v:{}", self.identity, self.value)
    }
}

/// Outbound MIDI sink
///
/// Implemented by raw transports and by [`crate::output::OutputBuffer`].
/// Transmission is assumed non-blocking and always eventually successful;
/// no result is consulted by the core.
pub trait MidiOut {
    /// Send a Control Change message
    fn send_cc(&mut self, channel: u8, cc: u8, value: u8);

    /// Send a Note On message
    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8);

    /// Send a Note Off message
    fn send_note_off(&mut self, channel: u8, note: u8, velocity: u8);

    /// Send by identity (dispatches to the kind-specific method)
    fn send(&mut self, identity: MidiIdentity, value: u8) {
        match identity.kind {
            MidiKind::ControlChange => self.send_cc(identity.channel, identity.number, value),
            MidiKind::NoteOn => self.send_note_on(identity.channel, identity.number, value),
            MidiKind::NoteOff => self.send_note_off(identity.channel, identity.number, value),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Sink that records every transmitted message, for assertions
    #[derive(Debug, Default)]
    pub struct RecordingOut {
        pub messages: Vec<MidiMessage>,
    }

    impl RecordingOut {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last(&self) -> Option<&MidiMessage> {
            self.messages.last()
        }
    }

    impl MidiOut for RecordingOut {
        fn send_cc(&mut self, channel: u8, cc: u8, value: u8) {
            self.messages.push(MidiMessage {
                identity: MidiIdentity::cc(channel, cc),
                value,
            });
        }

        fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) {
            self.messages.push(MidiMessage {
                identity: MidiIdentity {
                    kind: MidiKind::NoteOn,
                    channel,
                    number: note,
                },
                value: velocity,
            });
        }

        fn send_note_off(&mut self, channel: u8, note: u8, velocity: u8) {
            self.messages.push(MidiMessage {
                identity: MidiIdentity {
                    kind: MidiKind::NoteOff,
                    channel,
                    number: note,
                },
                value: velocity,
            });
        }
    }
}
