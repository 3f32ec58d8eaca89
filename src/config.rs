//! Player configuration
//!
//! Loaded from and saved to TOML. Every section has defaults, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FINISH_TIMEOUT_MS, DEFAULT_FRAMES_COUNT, DEFAULT_IN_FLIGHT_BLOCKS,
    DEFAULT_INTERVAL_MS, DEFAULT_SAMPLE_RATE,
};
use crate::error::ConfigError;
use crate::render::RenderOptions;

const CONFIG_FILE: &str = "player.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Deadline for `wait_for_finish`; `None` waits indefinitely
    pub finish_timeout_ms: Option<u64>,
    pub backend: BackendConfig,
    pub render: RenderConfig,
}

/// Which backend to run and whether players share it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub locator: String,
    pub share: bool,
    pub dependencies: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            locator: "tone".to_string(),
            share: false,
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub interval_ms: f64,
    pub frames_count: usize,
    pub sample_rate: f32,
    pub channel_count: Option<u16>,
    pub in_flight_blocks: usize,
    pub block_frames: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            frames_count: DEFAULT_FRAMES_COUNT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count: None,
            in_flight_blocks: DEFAULT_IN_FLIGHT_BLOCKS,
            block_frames: None,
        }
    }
}

impl RenderConfig {
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            in_flight_blocks: self.in_flight_blocks,
            block_frames: self.block_frames,
            interval_ms: self.interval_ms,
        }
    }
}

impl PlayerConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "synth-bridge", "synth-bridge")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let render = &self.render;
        if !(render.sample_rate > 0.0) {
            return Err(ConfigError::Invalid {
                field: "render.sample_rate",
                reason: format!("must be positive, got {}", render.sample_rate),
            });
        }
        if render.frames_count == 0 {
            return Err(ConfigError::Invalid {
                field: "render.frames_count",
                reason: "must be non-zero".into(),
            });
        }
        if render.block_frames == Some(0) {
            return Err(ConfigError::Invalid {
                field: "render.block_frames",
                reason: "must be non-zero".into(),
            });
        }
        if !(render.interval_ms >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "render.interval_ms",
                reason: format!("must not be negative, got {}", render.interval_ms),
            });
        }
        if render.channel_count == Some(0) {
            return Err(ConfigError::Invalid {
                field: "render.channel_count",
                reason: "must be non-zero".into(),
            });
        }
        if self.backend.locator.is_empty() {
            return Err(ConfigError::Invalid {
                field: "backend.locator",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn finish_timeout(&self) -> Option<Duration> {
        self.finish_timeout_ms.map(Duration::from_millis)
    }

    /// Configured timeout, or the built-in default when unset
    pub fn finish_timeout_or_default(&self) -> Duration {
        self.finish_timeout()
            .unwrap_or(Duration::from_millis(DEFAULT_FINISH_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config: PlayerConfig = toml::from_str("").unwrap();
        assert_eq!(config, PlayerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: PlayerConfig = toml::from_str(
            r#"
            finish_timeout_ms = 250

            [backend]
            share = true

            [render]
            frames_count = 1024
            "#,
        )
        .unwrap();
        assert!(config.backend.share);
        assert_eq!(config.backend.locator, "tone");
        assert_eq!(config.render.frames_count, 1024);
        assert_eq!(config.render.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.finish_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_validate_rejects_zero_frames_and_rate() {
        let mut config = PlayerConfig::default();
        config.render.frames_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "render.frames_count",
                ..
            })
        ));

        let mut config = PlayerConfig::default();
        config.render.sample_rate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "render.sample_rate",
                ..
            })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("synth-bridge-test-{}", std::process::id()))
            .join(CONFIG_FILE);
        let mut config = PlayerConfig::default();
        config.render.in_flight_blocks = 3;
        config.backend.dependencies = vec!["extra.js".into()];
        config.save(&path).unwrap();

        let loaded = PlayerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("synth-bridge-does-not-exist.toml");
        assert_eq!(
            PlayerConfig::load_or_default(&path).unwrap(),
            PlayerConfig::default()
        );
    }

    #[test]
    fn test_render_options_follow_config() {
        let config = RenderConfig {
            in_flight_blocks: 4,
            block_frames: Some(256),
            ..Default::default()
        };
        let options = config.options();
        assert_eq!(options.in_flight_blocks, 4);
        assert_eq!(options.block_frames, Some(256));
    }
}
