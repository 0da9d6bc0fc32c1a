//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime settings shared by the live engine and the offline renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sample rate of the live context; exports render at the same rate.
    pub sample_rate: u32,
    /// Timeline length in beats. Playback without a loop stops here.
    pub timeline_beats: f64,
    /// Beats per bar, used for the default loop length (one bar).
    pub beats_per_bar: u32,
    /// Track limit under the free access level.
    pub free_max_tracks: usize,
    /// Effect-per-track limit under the free access level.
    pub free_max_effects_per_track: usize,
    /// Band limit of the parametric EQ.
    pub max_parametric_bands: usize,
    /// Fixed seed for impulse-response noise. `None` draws fresh entropy
    /// for every generated response.
    pub noise_seed: Option<u64>,
    /// Base URL of the AI suggestion / license service.
    pub service_base_url: Option<String>,
    /// Click on every beat during live playback.
    pub metronome: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            timeline_beats: 2000.0,
            beats_per_bar: 4,
            free_max_tracks: 9,
            free_max_effects_per_track: 3,
            max_parametric_bands: 8,
            noise_seed: None,
            service_base_url: None,
            metronome: false,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load the per-user configuration file, falling back to defaults when
    /// it does not exist.
    #[cfg(feature = "native")]
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(path),
            _ => Ok(Self::default()),
        }
    }

    /// Location of the per-user configuration file.
    #[cfg(feature = "native")]
    pub fn default_path() -> Option<std::path::PathBuf> {
        directories::ProjectDirs::from("net", "daww", "daww")
            .map(|dirs| dirs.config_dir().join("engine.json"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sampleRate must be positive".into()));
        }
        if !(self.timeline_beats > 0.0) {
            return Err(ConfigError::Invalid("timelineBeats must be positive".into()));
        }
        if self.beats_per_bar == 0 {
            return Err(ConfigError::Invalid("beatsPerBar must be positive".into()));
        }
        Ok(())
    }

    /// Timeline length in seconds at the given tempo.
    pub fn timeline_seconds(&self, bpm: f64) -> f64 {
        self.timeline_beats * 60.0 / bpm
    }
}
