use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default phase lengths in minutes.
pub const DEFAULT_FOCUS_MINUTES: u32 = 25;
pub const DEFAULT_SHORT_REST_MINUTES: u32 = 5;
pub const DEFAULT_LONG_REST_MINUTES: u32 = 15;
pub const DEFAULT_CYCLES_PER_LONG_REST: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Focus,
    ShortRest,
    LongRest,
}

impl Phase {
    pub fn is_rest(self) -> bool {
        !matches!(self, Phase::Focus)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Focus => "Focus",
            Phase::ShortRest => "Short Rest",
            Phase::LongRest => "Long Rest",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Phase lengths and the long-rest cadence for one session.
///
/// All values are positive. Use [`SessionConfig::validate`] to build one
/// from host input; zero is rejected rather than clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_short_rest_minutes")]
    pub short_rest_minutes: u32,
    #[serde(default = "default_long_rest_minutes")]
    pub long_rest_minutes: u32,
    #[serde(default = "default_cycles_per_long_rest")]
    pub cycles_per_long_rest: u32,
}

fn default_focus_minutes() -> u32 {
    DEFAULT_FOCUS_MINUTES
}
fn default_short_rest_minutes() -> u32 {
    DEFAULT_SHORT_REST_MINUTES
}
fn default_long_rest_minutes() -> u32 {
    DEFAULT_LONG_REST_MINUTES
}
fn default_cycles_per_long_rest() -> u32 {
    DEFAULT_CYCLES_PER_LONG_REST
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            focus_minutes: DEFAULT_FOCUS_MINUTES,
            short_rest_minutes: DEFAULT_SHORT_REST_MINUTES,
            long_rest_minutes: DEFAULT_LONG_REST_MINUTES,
            cycles_per_long_rest: DEFAULT_CYCLES_PER_LONG_REST,
        }
    }
}

impl SessionConfig {
    /// Reject any non-positive field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("session.focus_minutes", self.focus_minutes),
            ("session.short_rest_minutes", self.short_rest_minutes),
            ("session.long_rest_minutes", self.long_rest_minutes),
            ("session.cycles_per_long_rest", self.cycles_per_long_rest),
        ];
        for (key, value) in fields {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be a positive integer".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn minutes_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.focus_minutes,
            Phase::ShortRest => self.short_rest_minutes,
            Phase::LongRest => self.long_rest_minutes,
        }
    }

    /// Phase length in milliseconds.
    ///
    /// Uses saturating arithmetic to prevent overflow with large values.
    pub fn duration_ms(&self, phase: Phase) -> u64 {
        u64::from(self.minutes_for(phase))
            .saturating_mul(60)
            .saturating_mul(1000)
    }

    /// The transition table.
    ///
    /// Returns the next phase and the cycle index after `phase` completes.
    /// Completing Focus bumps the cycle index; every
    /// `cycles_per_long_rest`-th completion leads into a long rest.
    pub fn next_phase(&self, phase: Phase, cycle_index: u32) -> (Phase, u32) {
        match phase {
            Phase::Focus => {
                let completed = cycle_index.saturating_add(1);
                let cadence = self.cycles_per_long_rest.max(1);
                if completed % cadence == 0 {
                    (Phase::LongRest, completed)
                } else {
                    (Phase::ShortRest, completed)
                }
            }
            Phase::ShortRest | Phase::LongRest => (Phase::Focus, cycle_index),
        }
    }
}
