//! Engine configuration
//!
//! The engine needs very little configuration; everything with experimental
//! meaning lives in the state tree itself.

use serde::{Deserialize, Serialize};

/// Configuration for an experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Compare key names upper-cased (`"k"` matches `"K"`)
    #[serde(default = "default_true")]
    pub uppercase_keys: bool,

    /// Loop iterations that may start within a single tick
    #[serde(default = "default_max_iterations_per_tick")]
    pub max_iterations_per_tick: usize,

    /// Optional: stop `run()` with an error after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,

    /// Whether composite states (Serial, Loop, ...) emit exit records
    #[serde(default = "default_true")]
    pub log_composites: bool,

    /// Optional: seed for jittered and shuffled references
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations_per_tick() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            uppercase_keys: true,
            max_iterations_per_tick: default_max_iterations_per_tick(),
            max_ticks: None,
            log_composites: true,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: enable or disable key name upper-casing
    pub fn with_uppercase_keys(mut self, enabled: bool) -> Self {
        self.uppercase_keys = enabled;
        self
    }

    /// Builder method: cap loop iterations started per tick (at least one)
    pub fn with_max_iterations_per_tick(mut self, limit: usize) -> Self {
        self.max_iterations_per_tick = limit.max(1);
        self
    }

    /// Builder method: limit the number of ticks `run()` may take
    pub fn with_max_ticks(mut self, limit: u64) -> Self {
        self.max_ticks = Some(limit);
        self
    }

    /// Builder method: enable or disable composite exit records
    pub fn with_composite_logging(mut self, enabled: bool) -> Self {
        self.log_composites = enabled;
        self
    }

    /// Builder method: make random references reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Normalize a key name according to the configuration
    pub fn normalize_key(&self, key: &str) -> String {
        if self.uppercase_keys {
            key.to_uppercase()
        } else {
            key.to_string()
        }
    }
}
