use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use directories::BaseDirs;

use crate::error::{KeypinError, Result};
use crate::keys::LayerId;
use crate::pins::PinScope;

const CONFIG_DIR: &str = "keypin";
const MAIN_CONFIG_FILE: &str = "config.toml";
const DATA_DIR: &str = "data";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub pins: PinsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `data/` next to the config file.
    pub data_dir: Option<PathBuf>,
}

/// Layers searched for an existing pin of the same tab before pinning it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateScope {
    /// Only the layer being pinned into.
    #[default]
    Layer,
    /// The global layer and the target layer.
    View,
    /// Every layer.
    #[serde(rename = "global", alias = "all")]
    All,
}

impl DuplicateScope {
    pub fn layers(self, target: LayerId) -> Vec<LayerId> {
        match self {
            DuplicateScope::Layer => vec![target],
            DuplicateScope::View => target.view(),
            DuplicateScope::All => LayerId::all().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinsConfig {
    pub default_scope: PinScope,
    pub duplicate_scope: DuplicateScope,
    /// Tabs at these urls are closed instead of being remembered as history.
    pub new_tab_urls: Vec<String>,
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            default_scope: PinScope::Origin,
            duplicate_scope: DuplicateScope::Layer,
            new_tab_urls: vec![
                "chrome://newtab/".to_string(),
                "about:newtab".to_string(),
                "edge://newtab/".to_string(),
            ],
        }
    }
}

pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
    app_config: AppConfig,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self::with_dir(config_dir))
    }

    /// Config rooted at `config_dir` instead of the platform directory.
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let config_path = config_dir.join(MAIN_CONFIG_FILE);
        Self::load(config_dir, config_path)
    }

    /// Config read from an explicit file; data lives next to it.
    pub fn with_file(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::load(config_dir, config_path)
    }

    fn load(config_dir: PathBuf, config_path: PathBuf) -> Self {
        let app_config = Self::load_toml_file(&config_path).unwrap_or_default();
        Self {
            config_dir,
            config_path,
            app_config,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn app_config_mut(&mut self) -> &mut AppConfig {
        &mut self.app_config
    }

    pub fn data_dir(&self) -> PathBuf {
        self.app_config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join(DATA_DIR))
    }

    fn get_config_dir() -> Result<PathBuf> {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join(CONFIG_DIR))
            .ok_or_else(|| KeypinError::Config("Could not determine config directory".to_string()))
    }

    fn load_toml_file<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)
                .map_err(|e| KeypinError::Config(format!("Failed to create config dir: {}", e)))?;
        }
        Ok(())
    }

    /// Writes the default config unless a file already exists. Returns
    /// whether a file was written.
    pub fn write_default_config(&self) -> Result<bool> {
        self.ensure_config_dir()?;

        if self.config_path.exists() {
            return Ok(false);
        }
        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| KeypinError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&self.config_path, content)
            .map_err(|e| KeypinError::Config(format!("Failed to write config: {}", e)))?;
        Ok(true)
    }
}
