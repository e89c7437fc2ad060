//! Write-coalescing, rate-limited MIDI output buffer
//!
//! Hardware encoders emit updates far faster than a MIDI-class transport
//! usefully consumes them. The buffer collapses repeated writes to the
//! same (kind, channel, number) identity into one pending value
//! (last-writer-wins) and drains a bounded batch per tick, so a flood of
//! encoder samples degrades into a bounded number of transport writes.
//!
//! Lookup uses a fixed-size power-of-two bucket table over an arena of
//! slots chained by index (open chaining), rather than a general hash
//! map: allocation stays bounded and the hot path is a short pointer-free
//! chain walk. Slot storage starts small and grows only on total
//! exhaustion; a compaction pass reclaims drained slots.

use crate::midi::{MidiIdentity, MidiKind, MidiOut};
use tracing::{trace, warn};

/// Initial slot capacity
const INITIAL_SLOTS: usize = 32;
/// Hard cap on slot storage; a `send` that cannot allocate is dropped
const MAX_SLOTS: usize = 256;
/// Bucket table length (power of two)
const BUCKET_COUNT: usize = 64;
/// Chain terminator / "no slot"
const INVALID: u16 = u16::MAX;

/// One coalescing slot: identity key fields, pending value, drain state
#[derive(Debug, Clone, Copy)]
struct BufferSlot {
    kind: MidiKind,
    channel: u8,
    number: u8,
    value: u8,
    /// Whether the current value has reached the raw sink
    sent: bool,
    /// Next slot index in the same hash bucket
    next: u16,
}

/// Coalescing output buffer in front of a raw MIDI sink
///
/// Writes go in through [`MidiOut`] (or [`OutputBuffer::push`]); a
/// periodic [`OutputBuffer::flush`] drains up to a bounded number of
/// pending messages to the real transport.
#[derive(Debug)]
pub struct OutputBuffer {
    slots: Vec<BufferSlot>,
    buckets: [u16; BUCKET_COUNT],
    /// Number of slots currently unsent
    pending: usize,
    /// Messages dropped because slot storage was exhausted
    dropped: u64,
    /// Pacing hint for the transport: reduce inter-message delay
    high_priority: bool,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(INITIAL_SLOTS),
            buckets: [INVALID; BUCKET_COUNT],
            pending: 0,
            dropped: 0,
            high_priority: false,
        }
    }

    /// Queue a value for an identity, overwriting any pending value
    ///
    /// Last-writer-wins: only the newest value survives to the next
    /// flush. Re-sending the value a drained slot already carries
    /// re-arms the slot; re-sending an identical pending value is a
    /// no-op. On exhaustion the write is dropped (previous pending
    /// values are kept) and the drop counter increments.
    pub fn push(&mut self, identity: MidiIdentity, value: u8) {
        let Some((index, created)) = self.find_or_create(identity) else {
            self.dropped += 1;
            warn!(%identity, value, dropped = self.dropped, "output buffer full, dropping");
            return;
        };

        let slot = &mut self.slots[index];
        if created {
            slot.value = value;
            return;
        }
        if slot.value != value || slot.sent {
            slot.value = value;
            if slot.sent {
                slot.sent = false;
                self.pending += 1;
            }
        }
    }

    /// Transmit up to `max_messages` pending messages (0 = no limit)
    ///
    /// Returns the count actually sent. Intended to be called once per
    /// processing tick with a small bound so bursts drain over several
    /// ticks instead of saturating the transport.
    pub fn flush(&mut self, out: &mut impl MidiOut, max_messages: u16) -> u16 {
        if self.pending == 0 {
            return 0;
        }

        let limit = if max_messages == 0 {
            self.pending
        } else {
            (max_messages as usize).min(self.pending)
        };

        let mut sent = 0usize;
        for slot in self.slots.iter_mut() {
            if sent >= limit {
                break;
            }
            if slot.sent {
                continue;
            }
            match slot.kind {
                MidiKind::ControlChange => out.send_cc(slot.channel, slot.number, slot.value),
                MidiKind::NoteOn => out.send_note_on(slot.channel, slot.number, slot.value),
                MidiKind::NoteOff => out.send_note_off(slot.channel, slot.number, slot.value),
            }
            slot.sent = true;
            sent += 1;
        }
        self.pending -= sent;

        // Reclaim drained slots once the arena is mostly consumed
        if self.pending == 0 && self.slots.len() > INITIAL_SLOTS / 2 {
            self.optimize();
        }

        sent as u16
    }

    /// Discard all pending state without transmitting
    pub fn clear(&mut self) {
        self.slots.clear();
        self.buckets = [INVALID; BUCKET_COUNT];
        self.pending = 0;
    }

    /// Number of messages waiting for a flush
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Messages dropped due to slot exhaustion since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Hint the transport pacing policy to reduce inter-message delay
    ///
    /// The buffer does not throttle by itself; callers read the hint
    /// back to pick their flush bound.
    pub fn set_high_priority(&mut self, high_priority: bool) {
        self.high_priority = high_priority;
    }

    pub fn high_priority(&self) -> bool {
        self.high_priority
    }

    /// Compact the slot arena, dropping drained slots
    ///
    /// Pending slots move to the front (relative order preserved) and
    /// the bucket table is rebuilt over the survivors. Runs
    /// automatically after a draining flush; callable explicitly during
    /// idle ticks.
    pub fn optimize(&mut self) {
        self.slots.retain(|slot| !slot.sent);
        self.buckets = [INVALID; BUCKET_COUNT];
        for index in 0..self.slots.len() {
            let bucket = bucket_of(
                self.slots[index].kind,
                self.slots[index].channel,
                self.slots[index].number,
            );
            self.slots[index].next = self.buckets[bucket];
            self.buckets[bucket] = index as u16;
        }
        trace!(live = self.slots.len(), "output buffer compacted");
    }

    /// Locate the slot for an identity, appending one if absent
    ///
    /// Walks the bucket chain comparing the full identity (hashes can
    /// collide). Returns `(index, created)`, or None when storage is
    /// exhausted even after compaction.
    fn find_or_create(&mut self, identity: MidiIdentity) -> Option<(usize, bool)> {
        let bucket = bucket_of(identity.kind, identity.channel, identity.number);

        let mut index = self.buckets[bucket];
        while index != INVALID {
            let slot = &self.slots[index as usize];
            if slot.kind == identity.kind
                && slot.channel == identity.channel
                && slot.number == identity.number
            {
                return Some((index as usize, false));
            }
            index = slot.next;
        }

        if self.slots.len() == MAX_SLOTS {
            self.optimize();
            if self.slots.len() == MAX_SLOTS {
                return None;
            }
            // Compaction rebuilt the chains; the identity is known absent
        }

        let new_index = self.slots.len();
        let bucket = bucket_of(identity.kind, identity.channel, identity.number);
        self.slots.push(BufferSlot {
            kind: identity.kind,
            channel: identity.channel,
            number: identity.number,
            value: 0,
            sent: false,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = new_index as u16;
        self.pending += 1;
        Some((new_index, true))
    }
}

impl MidiOut for OutputBuffer {
    fn send_cc(&mut self, channel: u8, cc: u8, value: u8) {
        self.push(MidiIdentity::cc(channel, cc), value);
    }

    fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.push(
            MidiIdentity {
                kind: MidiKind::NoteOn,
                channel,
                number: note,
            },
            velocity,
        );
    }

    fn send_note_off(&mut self, channel: u8, note: u8, velocity: u8) {
        self.push(
            MidiIdentity {
                kind: MidiKind::NoteOff,
                channel,
                number: note,
            },
            velocity,
        );
    }
}

/// FNV-1a over the identity bytes, folded into the bucket range
fn bucket_of(kind: MidiKind, channel: u8, number: u8) -> usize {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let kind_byte = match kind {
        MidiKind::ControlChange => 0u8,
        MidiKind::NoteOn => 1,
        MidiKind::NoteOff => 2,
    };

    let mut hash = FNV_OFFSET;
    for byte in [kind_byte, channel, number] {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as usize & (BUCKET_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::test_support::RecordingOut;
    use proptest::prelude::*;

    #[test]
    fn test_coalescing_last_writer_wins() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();
        let identity = MidiIdentity::cc(0, 7);

        buffer.push(identity, 10);
        buffer.push(identity, 20);
        assert_eq!(buffer.pending_count(), 1);

        assert_eq!(buffer.flush(&mut out, 1), 1);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].value, 20);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_distinct_identities_do_not_coalesce() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        buffer.push(MidiIdentity::cc(0, 7), 10);
        buffer.push(MidiIdentity::cc(1, 7), 11);
        buffer.push(MidiIdentity::cc(0, 8), 12);
        buffer.push(MidiIdentity::note(0, 7), 13); // same numbers, other kind
        assert_eq!(buffer.pending_count(), 4);

        buffer.flush(&mut out, 0);
        assert_eq!(out.messages.len(), 4);
    }

    #[test]
    fn test_flush_bound() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        for cc in 0..20u8 {
            buffer.push(MidiIdentity::cc(0, cc), cc);
        }
        assert_eq!(buffer.flush(&mut out, 8), 8);
        assert_eq!(out.messages.len(), 8);
        assert_eq!(buffer.pending_count(), 12);

        // Remaining messages drain on later ticks
        assert_eq!(buffer.flush(&mut out, 8), 8);
        assert_eq!(buffer.flush(&mut out, 8), 4);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_flush_zero_means_unlimited() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        for cc in 0..20u8 {
            buffer.push(MidiIdentity::cc(0, cc), cc);
        }
        assert_eq!(buffer.flush(&mut out, 0), 20);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_resend_after_drain_rearms_slot() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();
        let identity = MidiIdentity::cc(0, 7);

        buffer.push(identity, 10);
        buffer.flush(&mut out, 0);
        assert_eq!(buffer.pending_count(), 0);

        // Same value again after the drain must still be transmitted
        buffer.push(identity, 10);
        assert_eq!(buffer.pending_count(), 1);
        buffer.flush(&mut out, 0);
        assert_eq!(out.messages.len(), 2);
    }

    #[test]
    fn test_identical_pending_value_is_noop() {
        let mut buffer = OutputBuffer::new();
        let identity = MidiIdentity::cc(0, 7);

        buffer.push(identity, 10);
        buffer.push(identity, 10);
        assert_eq!(buffer.pending_count(), 1);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        for cc in 0..5u8 {
            buffer.push(MidiIdentity::cc(0, cc), cc);
        }
        buffer.clear();
        assert_eq!(buffer.pending_count(), 0);
        assert_eq!(buffer.flush(&mut out, 0), 0);
        assert!(out.messages.is_empty());
        assert_eq!(buffer.dropped_count(), 0);
    }

    #[test]
    fn test_exhaustion_drops_and_counts() {
        let mut buffer = OutputBuffer::new();

        // Fill every slot with a distinct pending identity. 16 channels
        // x 16 numbers = 256 = MAX_SLOTS; nothing is drained, so
        // compaction cannot reclaim anything.
        for channel in 0..16u8 {
            for number in 0..16u8 {
                buffer.push(MidiIdentity::cc(channel, number), 1);
            }
        }
        assert_eq!(buffer.pending_count(), 256);
        assert_eq!(buffer.dropped_count(), 0);

        buffer.push(MidiIdentity::cc(0, 100), 42);
        assert_eq!(buffer.dropped_count(), 1);
        // The rejected write must not disturb existing pending values
        assert_eq!(buffer.pending_count(), 256);

        buffer.push(MidiIdentity::cc(0, 101), 43);
        assert_eq!(buffer.dropped_count(), 2);
    }

    #[test]
    fn test_exhaustion_recovers_after_flush() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        for channel in 0..16u8 {
            for number in 0..16u8 {
                buffer.push(MidiIdentity::cc(channel, number), 1);
            }
        }
        buffer.flush(&mut out, 0); // drains everything and compacts

        buffer.push(MidiIdentity::cc(0, 100), 42);
        assert_eq!(buffer.dropped_count(), 0);
        assert_eq!(buffer.pending_count(), 1);
    }

    #[test]
    fn test_overwrite_still_counts_once_for_updates_to_same_identity() {
        let mut buffer = OutputBuffer::new();
        let identity = MidiIdentity::cc(0, 7);

        for value in 0..100u8 {
            buffer.push(identity, value);
        }
        assert_eq!(buffer.pending_count(), 1);
    }

    #[test]
    fn test_optimize_preserves_pending() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();

        for cc in 0..30u8 {
            buffer.push(MidiIdentity::cc(0, cc), cc);
        }
        buffer.flush(&mut out, 20);
        buffer.optimize();

        assert_eq!(buffer.pending_count(), 10);
        buffer.flush(&mut out, 0);
        assert_eq!(out.messages.len(), 30);

        // Values 20..30 survived compaction intact
        let tail: Vec<u8> = out.messages[20..].iter().map(|m| m.value).collect();
        assert_eq!(tail, (20..30).collect::<Vec<u8>>());
    }

    #[test]
    fn test_lookup_after_optimize() {
        let mut buffer = OutputBuffer::new();
        let mut out = RecordingOut::new();
        let identity = MidiIdentity::cc(3, 40);

        buffer.push(identity, 1);
        buffer.flush(&mut out, 0);
        buffer.optimize();

        // The chain was rebuilt; the identity must still coalesce
        buffer.push(identity, 2);
        buffer.push(identity, 3);
        assert_eq!(buffer.pending_count(), 1);
        buffer.flush(&mut out, 0);
        assert_eq!(out.last().unwrap().value, 3);
    }

    #[test]
    fn test_high_priority_hint() {
        let mut buffer = OutputBuffer::new();
        assert!(!buffer.high_priority());
        buffer.set_high_priority(true);
        assert!(buffer.high_priority());
    }

    proptest! {
        /// However many interleaved writes land on however many
        /// identities, one unbounded flush emits exactly one message
        /// per distinct identity, carrying the last value written.
        #[test]
        fn prop_flush_emits_last_value_per_identity(
            writes in proptest::collection::vec((0u8..4, 0u8..8, 0u8..128), 1..200)
        ) {
            let mut buffer = OutputBuffer::new();
            let mut out = RecordingOut::new();
            let mut expected = std::collections::HashMap::new();

            for (channel, number, value) in writes {
                let identity = MidiIdentity::cc(channel, number);
                buffer.push(identity, value);
                expected.insert(identity, value);
            }

            prop_assert_eq!(buffer.pending_count(), expected.len());
            let sent = buffer.flush(&mut out, 0);
            prop_assert_eq!(sent as usize, expected.len());
            for msg in &out.messages {
                prop_assert_eq!(expected.get(&msg.identity).copied(), Some(msg.value));
            }
        }
    }
}
