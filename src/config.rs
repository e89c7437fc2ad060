//! Binding configuration - declarative control-to-MIDI mappings
//!
//! Handles parsing and validating YAML binding declarations and applying
//! them onto a [`Mapper`]. Persistence and file watching are the host's
//! concern; this module only understands the format.
//!
//! ```yaml
//! controls:
//!   - id: 71
//!     target: { kind: cc, channel: 0, number: 1 }
//!     strategy:
//!       type: relative
//!       encoding: binary_offset
//!       sensitivity: 1.0
//!   - id: 12
//!     target: { kind: note_on, channel: 0, number: 60 }
//!     note: { velocity: 100, duration_ms: 250 }
//! ```

use crate::mapper::{ControlId, Mapper, NoteOptions, DEFAULT_VELOCITY};
use crate::midi::MidiIdentity;
use crate::strategy::{MappingStrategy, RelativeEncoding};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Configuration rejected at load time
///
/// These are caller errors caught before any strategy is built, so
/// `encode` never has to guard against them at event time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Physical range cannot be scaled (upper <= lower)
    #[error("control {control}: degenerate physical range [{lower}, {upper}]")]
    DegenerateRange {
        control: ControlId,
        lower: i32,
        upper: i32,
    },

    /// Relative sensitivity must be a positive finite multiplier
    #[error("control {control}: invalid sensitivity {sensitivity}")]
    InvalidSensitivity {
        control: ControlId,
        sensitivity: f32,
    },

    /// MIDI channel out of 0-15
    #[error("control {control}: channel {channel} out of range 0-15")]
    ChannelOutOfRange { control: ControlId, channel: u8 },

    /// Controller/note number out of 0-127
    #[error("control {control}: number {number} out of range 0-127")]
    NumberOutOfRange { control: ControlId, number: u8 },

    /// Same control bound twice in one document
    #[error("control {control}: bound more than once")]
    DuplicateControl { control: ControlId },
}

/// Root binding document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlsConfig {
    pub controls: Vec<ControlBinding>,
}

/// One control's binding declaration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlBinding {
    /// Physical control identifier
    pub id: ControlId,
    /// MIDI parameter this control drives
    pub target: MidiIdentity,
    /// Mapping strategy; defaults to absolute over the full MIDI range
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Note behavior for button bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteConfig>,
}

/// Strategy variant selection and parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Absolute {
        lower: i32,
        upper: i32,
        #[serde(default = "default_true")]
        clamp: bool,
    },
    Relative {
        #[serde(default = "default_sensitivity")]
        sensitivity: f32,
        #[serde(default = "default_encoding")]
        encoding: RelativeEncoding,
        #[serde(default)]
        acceleration: bool,
    },
    DynamicRange {
        lower: i32,
        upper: i32,
        #[serde(default)]
        reset_threshold_ms: u64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Absolute {
            lower: 0,
            upper: 127,
            clamp: true,
        }
    }
}

/// Note velocity/duration/retrigger knobs
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct NoteConfig {
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    /// Auto-release after this many milliseconds; absent = hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub retrigger: bool,
}

fn default_true() -> bool {
    true
}

fn default_sensitivity() -> f32 {
    1.0
}

fn default_encoding() -> RelativeEncoding {
    RelativeEncoding::BinaryOffset
}

fn default_velocity() -> u8 {
    DEFAULT_VELOCITY
}

impl StrategyConfig {
    /// Validate parameters and build the strategy
    pub fn build(&self, control: ControlId) -> Result<MappingStrategy, ConfigError> {
        match *self {
            StrategyConfig::Absolute {
                lower,
                upper,
                clamp,
            } => {
                if upper <= lower {
                    return Err(ConfigError::DegenerateRange {
                        control,
                        lower,
                        upper,
                    });
                }
                Ok(MappingStrategy::absolute(lower, upper, clamp))
            }
            StrategyConfig::Relative {
                sensitivity,
                encoding,
                acceleration,
            } => {
                if !(sensitivity.is_finite() && sensitivity > 0.0) {
                    return Err(ConfigError::InvalidSensitivity {
                        control,
                        sensitivity,
                    });
                }
                Ok(MappingStrategy::relative(sensitivity, encoding, acceleration))
            }
            StrategyConfig::DynamicRange {
                lower,
                upper,
                reset_threshold_ms,
            } => {
                if upper <= lower {
                    return Err(ConfigError::DegenerateRange {
                        control,
                        lower,
                        upper,
                    });
                }
                Ok(MappingStrategy::dynamic_range(lower, upper, reset_threshold_ms))
            }
        }
    }
}

impl ControlBinding {
    /// Validate identity ranges and build the entry pieces
    fn validate(&self) -> Result<(MappingStrategy, NoteOptions), ConfigError> {
        if self.target.channel > 15 {
            return Err(ConfigError::ChannelOutOfRange {
                control: self.id,
                channel: self.target.channel,
            });
        }
        if self.target.number > 127 {
            return Err(ConfigError::NumberOutOfRange {
                control: self.id,
                number: self.target.number,
            });
        }
        let strategy = self.strategy.build(self.id)?;
        let note = self
            .note
            .map(|n| NoteOptions {
                velocity: n.velocity & 0x7F,
                duration_ms: n.duration_ms,
                retrigger: n.retrigger,
            })
            .unwrap_or_default();
        Ok((strategy, note))
    }
}

impl ControlsConfig {
    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse controls config")
    }

    /// Validate every binding without applying anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for binding in &self.controls {
            if !seen.insert(binding.id) {
                return Err(ConfigError::DuplicateControl {
                    control: binding.id,
                });
            }
            binding.validate()?;
        }
        Ok(())
    }

    /// Install all bindings onto a mapper
    ///
    /// All-or-nothing: the whole document is validated before the first
    /// binding is installed. Returns the number of bindings applied.
    pub fn apply(&self, mapper: &mut Mapper) -> Result<usize, ConfigError> {
        self.validate()?;
        for binding in &self.controls {
            // Validated above; build cannot fail here
            let (strategy, note) = binding.validate()?;
            mapper.set_mapping_with_options(binding.id, binding.target, strategy, note);
        }
        info!(count = self.controls.len(), "applied control bindings");
        Ok(self.controls.len())
    }
}
