//! Engine Configuration
//!
//! The engine has a single tunable today: the runaway-frame ceiling. The
//! configuration is per thread, like the rest of the runtime state, and can
//! be loaded from JSON so hosts can keep it next to their other settings.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reactive::runtime::with_runtime;

/// Default number of frames a clock may drain before the batch is declared
/// runaway.
pub const DEFAULT_MAX_FRAMES: usize = 100_000;

/// Tunables for the propagation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum frames a single clock run may drain before failing with
    /// [`Error::RunawayClock`].
    pub max_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        if config.max_frames == 0 {
            return Err(Error::Config("max_frames must be at least 1".to_string()));
        }
        Ok(config)
    }
}

/// Install `config` for the current thread's engine.
pub fn configure(config: EngineConfig) {
    with_runtime(|rt| rt.set_config(config));
}

/// The configuration active on the current thread.
pub fn config() -> EngineConfig {
    with_runtime(|rt| rt.config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_json_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_frames, DEFAULT_MAX_FRAMES);
    }

    #[test]
    fn parse_custom_ceiling() {
        let config = EngineConfig::from_json(r#"{"max_frames": 64}"#).unwrap();
        assert_eq!(config.max_frames, 64);
    }

    #[test]
    fn reject_zero_ceiling_and_garbage() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"max_frames": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(EngineConfig::from_json("not json"), Err(Error::Config(_))));
    }

    #[test]
    fn configure_is_thread_local() {
        configure(EngineConfig { max_frames: 7 });
        assert_eq!(config().max_frames, 7);

        let other = std::thread::spawn(|| config().max_frames).join().unwrap();
        assert_eq!(other, DEFAULT_MAX_FRAMES);
        configure(EngineConfig::default());
    }
}
