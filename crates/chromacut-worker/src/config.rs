use std::time::Duration;

use chromacut_pipeline::ChangeClass;
use chromacut_pipeline::diagnostics::duration_serde;
use serde::{Deserialize, Serialize};

/// Debounce windows for the orchestrator.
///
/// Durations serialize as fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period before a heavy change is dispatched.
    #[serde(with = "duration_serde")]
    pub heavy_debounce: Duration,
    /// Quiet period before a light change is dispatched.
    #[serde(with = "duration_serde")]
    pub light_debounce: Duration,
}

impl SchedulerConfig {
    /// Default heavy debounce.
    pub const DEFAULT_HEAVY_DEBOUNCE: Duration = Duration::from_millis(800);
    /// Default light debounce.
    pub const DEFAULT_LIGHT_DEBOUNCE: Duration = Duration::from_millis(400);

    /// No debounce at all; every change is due immediately.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            heavy_debounce: Duration::ZERO,
            light_debounce: Duration::ZERO,
        }
    }

    /// Debounce window for `class`.
    #[must_use]
    pub const fn debounce(&self, class: ChangeClass) -> Duration {
        match class {
            ChangeClass::Heavy => self.heavy_debounce,
            ChangeClass::Light => self.light_debounce,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heavy_debounce: Self::DEFAULT_HEAVY_DEBOUNCE,
            light_debounce: Self::DEFAULT_LIGHT_DEBOUNCE,
        }
    }
}
