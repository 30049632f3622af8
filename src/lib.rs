pub mod camera;
pub mod chain;
pub mod convert;
pub mod error;
pub mod filter;
pub mod gpu;
pub mod pipeline;
pub mod profile;
pub mod render;

use serde::{Deserialize, Serialize};

use crate::camera::Facing;

/// Pipeline configuration, immutable for the lifetime of one pipeline instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub preview: PreviewConfig,
    pub profiling: ProfilingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
    pub torch_on: bool,
    pub filter_enabled: bool,
    pub mirror_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    pub enabled: bool,
    /// Number of frames kept in the rolling latency window
    pub window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview: PreviewConfig {
                width: 640,
                height: 480,
                facing: Facing::Back,
                torch_on: false,
                filter_enabled: false,
                mirror_enabled: false,
            },
            profiling: ProfilingConfig {
                enabled: false,
                window: 120,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing sections.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_contract() {
        let config = Config::default();
        assert_eq!(config.preview.width, 640);
        assert_eq!(config.preview.height, 480);
        assert_eq!(config.preview.facing, Facing::Back);
        assert!(!config.preview.torch_on);
        assert!(!config.preview.mirror_enabled);
    }
}
