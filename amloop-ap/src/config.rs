//! Configuration for amloop-ap
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`AMLOOP_CROSSFADE_SECONDS`, `AMLOOP_LOOP_LAST_SECONDS`)
//! 3. TOML configuration file (`--config`, `AMLOOP_CONFIG`, or the user config dir)
//! 4. Built-in defaults
//!
//! Example file:
//!
//! ```toml
//! device = "default"
//!
//! [engine]
//! crossfade_seconds = 0.2
//! loop_last_seconds = 0.0
//! curve = "smootherstep"
//!
//! [logging]
//! level = "info"
//!
//! [[clips]]
//! id = "rain"
//! url = "/usr/share/sounds/rain.flac"
//! ```

use crate::audio::buffer::ClipSource;
use crate::error::{Error, Result};
use amloop_common::config::{
    env_f64, load_toml_or_default, resolve_config_path, LoggingConfig, CONFIG_ENV_VAR,
};
use amloop_common::fade_curves::{CrossfadeCurve, FadeShape, DEFAULT_CURVE_STEPS};
use amloop_common::timing::recommended_tick_seconds;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment override for the loop crossfade length
pub const CROSSFADE_ENV_VAR: &str = "AMLOOP_CROSSFADE_SECONDS";

/// Environment override for the loop region length
pub const LOOP_LAST_ENV_VAR: &str = "AMLOOP_LOOP_LAST_SECONDS";

/// Loop engine settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of every loop-boundary crossfade
    pub crossfade_seconds: f64,

    /// Length of a user-initiated switch crossfade (defaults to `crossfade_seconds`)
    pub switch_crossfade_seconds: Option<f64>,

    /// Repeat only the last N seconds of each clip after the first pass (0 = whole clip)
    pub loop_last_seconds: f64,

    /// Attack ramp on the very first iteration
    pub start_fade_seconds: f64,

    /// Release ramp on stop
    pub stop_fade_seconds: f64,

    /// Resolution of the crossfade tables
    pub curve_steps: u32,

    /// Crossfade shape
    pub curve: FadeShape,

    /// Tick period override; derived from the crossfade when unset
    pub tick_interval_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crossfade_seconds: 0.2,
            switch_crossfade_seconds: None,
            loop_last_seconds: 0.0,
            start_fade_seconds: 0.05,
            stop_fade_seconds: 0.1,
            curve_steps: DEFAULT_CURVE_STEPS,
            curve: FadeShape::Smootherstep,
            tick_interval_ms: None,
        }
    }
}

impl EngineConfig {
    /// Reject settings the scheduler cannot honor
    pub fn validate(&self) -> Result<()> {
        fn check(name: &str, value: f64, allow_zero: bool) -> Result<()> {
            let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
            if ok {
                return Ok(());
            }
            let expected = if allow_zero { "non-negative" } else { "positive" };
            Err(Error::Config(format!("{} must be {}, got {}", name, expected, value)))
        }

        check("crossfade_seconds", self.crossfade_seconds, false)?;
        if let Some(switch) = self.switch_crossfade_seconds {
            check("switch_crossfade_seconds", switch, false)?;
        }
        check("loop_last_seconds", self.loop_last_seconds, true)?;
        check("start_fade_seconds", self.start_fade_seconds, true)?;
        check("stop_fade_seconds", self.stop_fade_seconds, true)?;
        if self.tick_interval_ms == Some(0) {
            return Err(Error::Config("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn switch_crossfade_seconds(&self) -> f64 {
        self.switch_crossfade_seconds.unwrap_or(self.crossfade_seconds)
    }

    /// Tick period for the driver task
    pub fn tick_interval(&self) -> Duration {
        match self.tick_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs_f64(recommended_tick_seconds(self.crossfade_seconds)),
        }
    }

    /// Build the crossfade tables for this configuration
    pub fn curve(&self) -> CrossfadeCurve {
        CrossfadeCurve::generate_with(self.curve, self.curve_steps)
    }
}

/// Configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,

    /// Output device name (default device when unset)
    pub device: Option<String>,

    /// Clips to preload at startup
    pub clips: Vec<ClipSource>,
}

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub crossfade_seconds: Option<f64>,
    pub loop_last_seconds: Option<f64>,
    pub device: Option<String>,
}

/// Resolve, load and validate the configuration
pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<TomlConfig> {
    let path = resolve_config_path(config_path, CONFIG_ENV_VAR);
    let mut config: TomlConfig = load_toml_or_default(path.as_deref())?;

    // Priority 2: Environment variables
    if let Some(value) = env_f64(CROSSFADE_ENV_VAR)? {
        config.engine.crossfade_seconds = value;
    }
    if let Some(value) = env_f64(LOOP_LAST_ENV_VAR)? {
        config.engine.loop_last_seconds = value;
    }

    // Priority 1: Command-line arguments
    if let Some(value) = overrides.crossfade_seconds {
        config.engine.crossfade_seconds = value;
    }
    if let Some(value) = overrides.loop_last_seconds {
        config.engine.loop_last_seconds = value;
    }
    if overrides.device.is_some() {
        config.device = overrides.device.clone();
    }

    config.engine.validate()?;
    debug!("Effective engine config: {:?}", config.engine);
    Ok(config)
}
