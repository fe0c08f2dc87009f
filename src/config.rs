// Configuration constants and file loading for menuscan
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::menu_extraction::classifier::ClassifierRules;
use crate::types::ConfigError;

// Rasterizer settings
pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_MAX_PAGES: usize = 20;

// Recognition engine settings
pub const DEFAULT_LANGUAGE: &str = "eng";
pub const DEFAULT_ENGINE_MODE: u8 = 3;
pub const DEFAULT_RECOGNITION_TIMEOUT_SECS: u64 = 60;

pub const CONFIG_FILE_NAME: &str = "menuscan.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MenuscanConfig {
    pub engine: EngineConfig,
    pub rasterizer: RasterizerConfig,
    pub pipeline: PipelineConfig,
    pub classifier: ClassifierRules,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tesseract_path: PathBuf,
    pub language: String,
    pub engine_mode: u8,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            language: DEFAULT_LANGUAGE.to_string(),
            engine_mode: DEFAULT_ENGINE_MODE,
            timeout_secs: DEFAULT_RECOGNITION_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RasterizerConfig {
    pub pdftoppm_path: PathBuf,
    pub dpi: u32,
    pub max_pages: usize,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            pdftoppm_path: PathBuf::from("pdftoppm"),
            dpi: DEFAULT_DPI,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recognition jobs allowed in flight at once. Unset means one per CPU.
    pub workers: Option<usize>,
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl MenuscanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Explicit path first, then `./menuscan.toml`, then the user config dir.
    /// Environment overrides are applied last and the result is validated.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match default_config_path() {
                Some(found) => Self::load(&found)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MENUSCAN_TESSERACT") {
            self.engine.tesseract_path = PathBuf::from(path);
        }
        if let Some(lang) = lookup("MENUSCAN_LANG") {
            self.engine.language = lang;
        }
        if let Some(path) = lookup("MENUSCAN_PDFTOPPM") {
            self.rasterizer.pdftoppm_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("MENUSCAN_LOG") {
            self.logging.level = level;
        }
        if let Some(workers) = lookup("MENUSCAN_WORKERS") {
            let parsed = workers
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "MENUSCAN_WORKERS",
                    reason: e.to_string(),
                })?;
            self.pipeline.workers = Some(parsed);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.language.trim().is_empty() {
            return Err(invalid("engine.language", "must not be empty"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(invalid("engine.timeout_secs", "must be at least 1"));
        }
        if !(72..=1200).contains(&self.rasterizer.dpi) {
            return Err(invalid("rasterizer.dpi", "must be between 72 and 1200"));
        }
        if self.rasterizer.max_pages == 0 {
            return Err(invalid("rasterizer.max_pages", "must be at least 1"));
        }
        if self.pipeline.workers == Some(0) {
            return Err(invalid("pipeline.workers", "must be at least 1"));
        }
        self.classifier.validate()
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.to_string(),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("menuscan").join("config.toml"))
        .filter(|path| path.exists())
}
