//! Emulator configuration.
//!
//! Looked up in this order:
//! 1. The file named by the `SIMT_EMU_CONFIG` environment variable
//! 2. `./simt-emu.toml`
//! 3. Built-in defaults
//!
//! ```toml
//! wavefront_size = 32
//! mask_stack_depth = 16
//! max_work_group_size = 1024
//! max_instructions = 1000000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::emu::ConfigError;

pub const CONFIG_ENV: &str = "SIMT_EMU_CONFIG";
pub const LOCAL_CONFIG: &str = "simt-emu.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmuConfig {
    /// Lanes per wavefront, 32 or 64.
    pub wavefront_size: u32,
    /// Frames a mask stack may hold above the launch frame.
    pub mask_stack_depth: usize,
    /// Largest work-group a launch may request.
    pub max_work_group_size: u32,
    /// Abort once this many instructions have executed.
    pub max_instructions: Option<u64>,
}

impl Default for EmuConfig {
    fn default() -> Self {
        EmuConfig {
            wavefront_size: 64,
            mask_stack_depth: 32,
            max_work_group_size: 256,
            max_instructions: None,
        }
    }
}

impl EmuConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.wavefront_size, 32 | 64) {
            return Err(ConfigError::InvalidWavefrontSize(self.wavefront_size));
        }
        if self.mask_stack_depth == 0 {
            return Err(ConfigError::InvalidStackDepth);
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EmuConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads from the environment override, then the working directory,
    /// then falls back to defaults. A file that exists but does not parse
    /// is an error.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_file(Path::new(&path));
        }
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from_file(local);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EmuConfig::from_toml_str("wavefront_size = 32\n").unwrap();
        assert_eq!(config.wavefront_size, 32);
        assert_eq!(config.mask_stack_depth, 32);
        assert_eq!(config.max_work_group_size, 256);
        assert_eq!(config.max_instructions, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            EmuConfig::from_toml_str("wavefront_size = 48"),
            Err(ConfigError::InvalidWavefrontSize(48))
        ));
        assert!(matches!(
            EmuConfig::from_toml_str("mask_stack_depth = 0"),
            Err(ConfigError::InvalidStackDepth)
        ));
        assert!(matches!(
            EmuConfig::from_toml_str("wavefront_size = \"big\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EmuConfig::from_toml_str("lanes = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            EmuConfig::load_from_file(Path::new("/nonexistent/simt-emu.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
