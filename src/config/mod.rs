//! Configuration management.
//!
//! flowrun configuration can come from:
//! - Environment variables (FLOWRUN_*)
//! - Config file (~/.config/flowrun/config.toml)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// flowrun configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// Export tunables
    #[serde(default)]
    pub export: ExportConfig,
}

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default retry base delay in milliseconds when a node sets none
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Default maximum retry attempts when a node sets none
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between journaled step log lines in milliseconds (0 = none)
    #[serde(default)]
    pub log_pace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            log_pace_ms: 0,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

/// Export tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Default page size for run listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    50
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowrun"))
            .unwrap_or_else(|| PathBuf::from(".flowrun"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(delay) = std::env::var("FLOWRUN_BASE_DELAY_MS") {
            if let Ok(parsed) = delay.parse::<u64>() {
                self.engine.base_delay_ms = parsed;
            }
        }
        if let Ok(attempts) = std::env::var("FLOWRUN_MAX_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse::<u32>() {
                self.engine.max_attempts = parsed;
            }
        }
        if let Ok(pace) = std::env::var("FLOWRUN_LOG_PACE_MS") {
            if let Ok(parsed) = pace.parse::<u64>() {
                self.engine.log_pace_ms = parsed;
            }
        }
        if let Ok(size) = std::env::var("FLOWRUN_EXPORT_PAGE_SIZE") {
            if let Ok(parsed) = size.parse::<usize>() {
                self.export.page_size = parsed;
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(export) = partial.export {
            self.export = export;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    engine: Option<EngineConfig>,
    export: Option<ExportConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.base_delay_ms, 1_000);
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.log_pace_ms, 0);
        assert_eq!(config.export.page_size, 50);
    }

    #[test]
    fn test_partial_file_overrides_engine_only() {
        let mut config = Config::default();
        let partial: PartialConfig =
            toml::from_str("[engine]\nbase_delay_ms = 250\nmax_attempts = 5\n").unwrap();
        config.apply_partial(partial);

        assert_eq!(config.engine.base_delay_ms, 250);
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.export.page_size, 50);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("FLOWRUN_BASE_DELAY_MS", "125");
        std::env::set_var("FLOWRUN_EXPORT_PAGE_SIZE", "10");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.engine.base_delay_ms, 125);
        assert_eq!(config.export.page_size, 10);

        std::env::remove_var("FLOWRUN_BASE_DELAY_MS");
        std::env::remove_var("FLOWRUN_EXPORT_PAGE_SIZE");
    }
}
