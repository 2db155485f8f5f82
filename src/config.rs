//! Configuration loading.
//!
//! Reads a TOML file from `~/.config/retile/config.toml` and auto-generates
//! a default file on first run if missing.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tiling: TilingConfig,
    pub input: InputConfig,
    pub cache: CacheConfig,

    /// Action name to keybinding string. The core only consults the presence
    /// of the `decoration` entry; dispatch itself lives outside the engine.
    pub keys: HashMap<String, String>,

    /// Compiled `window_ignore` patterns, rebuilt after every load.
    #[serde(skip)]
    ignores: Vec<IgnorePattern>,
}

/// One compiled class/name ignore pair.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    pub class: Regex,
    pub name: Option<Regex>,
}

/// Tiling behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Upper bound for the master area client cap.
    pub window_masters_max: usize,
    /// Upper bound for the slave area client cap.
    pub window_slaves_max: usize,
    /// Windows are decorated after tracking starts.
    pub window_decoration: bool,
    /// `[class_regex, name_regex]` pairs; a class match without a name match
    /// keeps the window out of tiling.
    pub window_ignore: Vec<[String; 2]>,
    /// Step applied by proportion increase/decrease actions.
    pub proportion_step: f64,
    /// Lower clamp for any proportion entry.
    pub proportion_min: f64,
    /// Margin subtracted from every desktop rectangle: top/right/bottom/left.
    pub edge_margin: Vec<i32>,
    /// Margin for primary heads only; overrides `edge_margin` when set.
    pub edge_margin_primary: Vec<i32>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            window_masters_max: 3,
            window_slaves_max: 3,
            window_decoration: true,
            window_ignore: Vec::new(),
            proportion_step: 0.05,
            proportion_min: 0.1,
            edge_margin: vec![0, 0, 0, 0],
            edge_margin_primary: Vec::new(),
        }
    }
}

/// Pointer-driven input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Delay in ms before a hovered window is focused; 0 disables
    /// focus-follows-mouse entirely.
    pub window_focus_delay: u64,
    /// Corner name (`top_left`, ...) to action string.
    pub corners: HashMap<String, String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            window_focus_delay: 0,
            corners: HashMap::new(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persist window and workspace state between runs.
    pub enabled: bool,
    /// Cache root override; empty uses the platform cache directory.
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&content)
                .context("Failed to parse config file")?;
            info!("Configuration loaded from {:?}", config_path);
            config
        } else {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            Self::default()
        };

        config.compile_ignores();
        debug!("Config: {:?}", config);
        Ok(config)
    }

    /// Path to the config file.
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("retile");
        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file.
    fn save_default(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;
        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    /// Compile the `window_ignore` pairs; invalid patterns are skipped.
    pub fn compile_ignores(&mut self) {
        self.ignores = self
            .tiling
            .window_ignore
            .iter()
            .filter_map(|pair| {
                let class = match Regex::new(&pair[0].to_lowercase()) {
                    Ok(re) => re,
                    Err(e) => {
                        warn!("Invalid ignore class pattern {:?}: {}", pair[0], e);
                        return None;
                    }
                };
                let name = if pair[1].is_empty() {
                    None
                } else {
                    match Regex::new(&pair[1].to_lowercase()) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!("Invalid ignore name pattern {:?}: {}", pair[1], e);
                            None
                        }
                    }
                };
                Some(IgnorePattern { class, name })
            })
            .collect();
    }

    pub fn ignore_patterns(&self) -> &[IgnorePattern] {
        &self.ignores
    }

    /// The resolved cache root, or `None` when persistence is disabled.
    pub fn cache_root(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        if !self.cache.directory.is_empty() {
            return Some(PathBuf::from(&self.cache.directory));
        }
        dirs::cache_dir().map(|d| d.join("retile"))
    }

    /// Whether any hot-corner action is configured.
    pub fn has_corner_actions(&self) -> bool {
        self.input.corners.values().any(|action| !action.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.tiling.window_masters_max, 3);
        assert_eq!(config.tiling.proportion_step, 0.05);
        assert_eq!(config.tiling.proportion_min, 0.1);
        assert_eq!(config.input.window_focus_delay, 0);
        assert!(config.cache.enabled);
        assert!(!config.has_corner_actions());
    }

    #[test]
    fn ignore_patterns_compile() {
        let mut config = Config::default();
        config.tiling.window_ignore = vec![
            ["firefox".into(), String::new()],
            ["term.*".into(), "scratchpad".into()],
            ["[invalid".into(), String::new()],
        ];
        config.compile_ignores();

        let patterns = config.ignore_patterns();
        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].name.is_none());
        assert!(patterns[1].name.is_some());
        assert!(patterns[1].class.is_match("terminal"));
    }

    #[test]
    fn cache_root_disabled() {
        let mut config = Config::default();
        config.cache.enabled = false;
        assert!(config.cache_root().is_none());

        config.cache.enabled = true;
        config.cache.directory = "/tmp/retile-test".into();
        assert_eq!(config.cache_root(), Some(PathBuf::from("/tmp/retile-test")));
    }
}
