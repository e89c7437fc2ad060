//! Mapping strategies - physical value to 7-bit MIDI value conversion
//!
//! Three strategies cover the historically-established ways a hardware
//! control maps onto a MIDI parameter:
//!
//! - **Absolute**: linear scaling of a fixed physical range onto 0-127
//! - **Relative**: encoder deltas encoded in one of four relative wire
//!   formats, with optional speed-based acceleration
//! - **DynamicRange**: linear scaling against an adaptive range that
//!   widens as new extremes are observed
//!
//! Modeled as a closed enum with exhaustive matches rather than trait
//! objects, so a new variant is a compile-time-checked exercise.

use serde::{Deserialize, Serialize};

/// Relative encoding wire formats
///
/// Each format packs a signed delta into a 7-bit data byte. Receivers
/// disagree on the convention, so all four survive in the wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeEncoding {
    /// 64 = no change, 65 = +1, 63 = -1, ...
    BinaryOffset,
    /// Bit 6 = direction (1 = negative), bits 0-5 = magnitude
    SignedBit,
    /// 1-63 = positive, 65-127 = negative, 0 = no change
    Signed2,
    /// 1 = one detent up, 127 = one detent down, 0 = no change
    IncrementType,
}

impl RelativeEncoding {
    /// Byte meaning "no movement" for this format
    pub fn neutral(self) -> u8 {
        match self {
            RelativeEncoding::BinaryOffset => 64,
            RelativeEncoding::SignedBit
            | RelativeEncoding::Signed2
            | RelativeEncoding::IncrementType => 0,
        }
    }
}

/// Rotation speed (ticks/ms) below which no acceleration is applied
const ACCEL_SPEED_THRESHOLD: f32 = 0.01;
/// Rotation speed at which the acceleration factor reaches its cap
const ACCEL_SPEED_CEILING: f32 = 0.1;
/// Maximum acceleration factor
const ACCEL_MAX_FACTOR: f32 = 5.0;

/// Minimum width the DynamicRange window is allowed to collapse to
const DYNAMIC_MIN_SPAN: i32 = 10;

/// Mapping strategy bound to one control
///
/// `encode` turns a physical value into a 7-bit MIDI value; `decode` is
/// the inverse, used when replaying or simulating controller input.
/// Relative and DynamicRange are stateful (delta reference, adaptive
/// window); Absolute is pure.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingStrategy {
    /// Direct linear mapping of [lower, upper] onto 0-127
    Absolute {
        lower: i32,
        upper: i32,
        /// Saturate out-of-range physical values into the range first
        clamp: bool,
    },
    /// Delta encoding with optional speed-based acceleration
    Relative {
        sensitivity: f32,
        encoding: RelativeEncoding,
        acceleration: bool,
        /// Reference for delta computation
        last_physical: i32,
        /// Timestamp of the last movement (ms), 0 = never moved
        last_time_ms: u64,
    },
    /// Linear mapping against a window that widens with observed extremes
    DynamicRange {
        initial_lower: i32,
        initial_upper: i32,
        lower: i32,
        upper: i32,
        /// Inactivity gap (ms) after which the window resets to its
        /// initial bounds; 0 disables the reset
        reset_threshold_ms: u64,
        last_activity_ms: u64,
    },
}

impl MappingStrategy {
    /// Absolute strategy over [lower, upper]
    ///
    /// The range must be non-degenerate (`upper > lower`); configuration
    /// loading rejects anything else before a strategy is built.
    pub fn absolute(lower: i32, upper: i32, clamp: bool) -> Self {
        MappingStrategy::Absolute {
            lower,
            upper,
            clamp,
        }
    }

    /// Relative strategy with the given format
    pub fn relative(sensitivity: f32, encoding: RelativeEncoding, acceleration: bool) -> Self {
        MappingStrategy::Relative {
            sensitivity,
            encoding,
            acceleration,
            last_physical: 0,
            last_time_ms: 0,
        }
    }

    /// DynamicRange strategy starting from [lower, upper]
    pub fn dynamic_range(lower: i32, upper: i32, reset_threshold_ms: u64) -> Self {
        MappingStrategy::DynamicRange {
            initial_lower: lower,
            initial_upper: upper,
            lower,
            upper,
            reset_threshold_ms,
            last_activity_ms: 0,
        }
    }

    /// Strategy display name
    pub fn name(&self) -> &'static str {
        match self {
            MappingStrategy::Absolute { .. } => "Absolute",
            MappingStrategy::Relative { encoding, .. } => match encoding {
                RelativeEncoding::BinaryOffset => "Relative (Binary Offset)",
                RelativeEncoding::SignedBit => "Relative (Signed Bit)",
                RelativeEncoding::Signed2 => "Relative (Signed 2's)",
                RelativeEncoding::IncrementType => "Relative (Increment)",
            },
            MappingStrategy::DynamicRange { .. } => "DynamicRange",
        }
    }

    /// Physical input window for bounded strategies
    ///
    /// The mapper keeps unbounded hardware counters aligned with this
    /// window via a floating offset. Relative and DynamicRange strategies
    /// take unbounded input directly and report `None`.
    pub fn physical_window(&self) -> Option<(i32, i32)> {
        match self {
            MappingStrategy::Absolute { lower, upper, .. } => Some((*lower, *upper)),
            _ => None,
        }
    }

    /// Re-anchor the delta reference for relative strategies
    ///
    /// Called by the mapper on the first sample of a control so that the
    /// arbitrary startup position of a hardware counter does not read as
    /// a huge movement.
    pub fn set_reference(&mut self, physical: i32, now_ms: u64) {
        if let MappingStrategy::Relative {
            last_physical,
            last_time_ms,
            ..
        } = self
        {
            *last_physical = physical;
            *last_time_ms = now_ms;
        }
    }

    /// Convert a physical value into a 7-bit MIDI value
    ///
    /// `previous` is the last MIDI value the mapper emitted for this
    /// control; bounded strategies fall back to it when their window is
    /// degenerate instead of dividing by zero.
    pub fn encode(&mut self, physical: i32, previous: u8, now_ms: u64) -> u8 {
        match self {
            MappingStrategy::Absolute {
                lower,
                upper,
                clamp,
            } => {
                let span = *upper - *lower;
                if span <= 0 {
                    // Guarded at configuration time; never divide here
                    return previous;
                }
                let value = if *clamp {
                    physical.clamp(*lower, *upper)
                } else {
                    physical
                };
                scale_to_midi(value, *lower, span)
            }
            MappingStrategy::Relative {
                sensitivity,
                encoding,
                acceleration,
                last_physical,
                last_time_ms,
            } => {
                // Wrapping keeps the delta correct (and non-panicking)
                // when a long-running hardware counter wraps around
                let delta = physical.wrapping_sub(*last_physical);
                if delta == 0 {
                    // No movement: neutral byte, reference untouched
                    return encoding.neutral();
                }

                let mut factor = 1.0f32;
                if *acceleration && *last_time_ms > 0 {
                    let elapsed = now_ms.saturating_sub(*last_time_ms);
                    factor = acceleration_factor(delta, elapsed);
                }

                let scaled = (delta as f32 * *sensitivity * factor).round() as i32;

                *last_physical = physical;
                *last_time_ms = now_ms;

                encode_relative(scaled, *encoding)
            }
            MappingStrategy::DynamicRange {
                initial_lower,
                initial_upper,
                lower,
                upper,
                reset_threshold_ms,
                last_activity_ms,
            } => {
                // Collapse the window back after a long silence
                if *reset_threshold_ms > 0
                    && *last_activity_ms > 0
                    && now_ms.saturating_sub(*last_activity_ms) > *reset_threshold_ms
                {
                    *lower = *initial_lower;
                    *upper = *initial_upper;
                }
                *last_activity_ms = now_ms;

                if physical < *lower {
                    *lower = physical;
                    if *upper - *lower < DYNAMIC_MIN_SPAN {
                        *upper = *lower + DYNAMIC_MIN_SPAN;
                    }
                } else if physical > *upper {
                    *upper = physical;
                    if *upper - *lower < DYNAMIC_MIN_SPAN {
                        *lower = *upper - DYNAMIC_MIN_SPAN;
                    }
                }

                let span = *upper - *lower;
                if span <= 0 {
                    return previous;
                }
                scale_to_midi(physical, *lower, span)
            }
        }
    }

    /// Convert a 7-bit MIDI value back into a physical value
    ///
    /// For relative strategies the result is the decoded signed delta.
    pub fn decode(&self, midi: u8) -> i32 {
        match self {
            MappingStrategy::Absolute { lower, upper, .. } => {
                scale_from_midi(midi, *lower, *upper)
            }
            MappingStrategy::Relative { encoding, .. } => decode_relative(midi, *encoding),
            MappingStrategy::DynamicRange { lower, upper, .. } => {
                scale_from_midi(midi, *lower, *upper)
            }
        }
    }
}

/// Linear scale of `value` within `[lower, lower+span]` onto 0-127
fn scale_to_midi(value: i32, lower: i32, span: i32) -> u8 {
    let ratio = (value - lower) as f32 / span as f32;
    (ratio * 127.0).round().clamp(0.0, 127.0) as u8
}

/// Inverse of [`scale_to_midi`]
fn scale_from_midi(midi: u8, lower: i32, upper: i32) -> i32 {
    let ratio = midi as f32 / 127.0;
    lower + (ratio * (upper - lower) as f32).round() as i32
}

/// Acceleration factor from rotation speed
///
/// Speed is |delta| per millisecond. Below the threshold the factor is
/// 1.0; above it, it rises linearly and caps at [`ACCEL_MAX_FACTOR`].
fn acceleration_factor(delta: i32, elapsed_ms: u64) -> f32 {
    if elapsed_ms == 0 {
        return 1.0;
    }
    let speed = delta.unsigned_abs() as f32 / elapsed_ms as f32;
    if speed < ACCEL_SPEED_THRESHOLD {
        1.0
    } else {
        let rise = (ACCEL_MAX_FACTOR - 1.0) * (speed - ACCEL_SPEED_THRESHOLD)
            / (ACCEL_SPEED_CEILING - ACCEL_SPEED_THRESHOLD);
        1.0 + rise.clamp(0.0, ACCEL_MAX_FACTOR - 1.0)
    }
}

/// Pack a signed delta into the given relative wire format
fn encode_relative(delta: i32, encoding: RelativeEncoding) -> u8 {
    let delta = delta.clamp(-63, 63);

    match encoding {
        RelativeEncoding::BinaryOffset => (64 + delta) as u8,
        RelativeEncoding::SignedBit => {
            if delta >= 0 {
                (delta & 0x3F) as u8
            } else {
                (0x40 | (-delta & 0x3F)) as u8
            }
        }
        RelativeEncoding::Signed2 => {
            if delta > 0 {
                (delta & 0x3F) as u8
            } else if delta < 0 {
                (0x40 | (-delta & 0x3F)) as u8
            } else {
                0
            }
        }
        RelativeEncoding::IncrementType => {
            if delta > 0 {
                0x01
            } else if delta < 0 {
                0x7F
            } else {
                0
            }
        }
    }
}

/// Unpack a relative wire byte into a signed delta
fn decode_relative(midi: u8, encoding: RelativeEncoding) -> i32 {
    match encoding {
        RelativeEncoding::BinaryOffset => midi as i32 - 64,
        RelativeEncoding::SignedBit => {
            if midi & 0x40 == 0 {
                (midi & 0x3F) as i32
            } else {
                -((midi & 0x3F) as i32)
            }
        }
        RelativeEncoding::Signed2 => {
            if midi == 0 {
                0
            } else if midi & 0x40 == 0 {
                (midi & 0x3F) as i32
            } else {
                -((midi & 0x3F) as i32)
            }
        }
        RelativeEncoding::IncrementType => match midi {
            0x01 => 1,
            0x7F => -1,
            _ => 0,
        },
    }
}
