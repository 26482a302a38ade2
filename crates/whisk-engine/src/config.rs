use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use whisk_contracts::folders::{
    FolderLayout, DEFAULT_CHARACTERS_DIR, DEFAULT_SCENES_DIR, DEFAULT_STYLE_DIR,
};
use whisk_contracts::settings::{AspectRatio, DEFAULT_IMAGE_COUNT, MAX_IMAGE_COUNT, MIN_IMAGE_COUNT};

use crate::error::{EngineError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::service::{ApiEndpoints, DEFAULT_LABS_API_BASE, DEFAULT_SANDBOX_API_BASE};

pub const CONFIG_FILE_NAME: &str = "autowhisk.json";
pub const OUTPUT_DIR_NAME: &str = "AutoWhisk_Output";

pub const LABS_API_BASE_ENV: &str = "AUTOWHISK_LABS_API_BASE";
pub const SANDBOX_API_BASE_ENV: &str = "AUTOWHISK_SANDBOX_API_BASE";
pub const OUTPUT_DIR_ENV: &str = "AUTOWHISK_OUTPUT_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiskConfig {
    pub base_dir: PathBuf,
    pub characters_dir: PathBuf,
    pub scenes_dir: PathBuf,
    pub style_dir: PathBuf,
    pub output_dir: PathBuf,
    pub aspect_ratio: AspectRatio,
    pub image_count: usize,
    pub request_delay_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub task_cooldown_ms: u64,
    pub labs_api_base: String,
    pub sandbox_api_base: String,
    pub request_timeout_s: u64,
}

impl Default for WhiskConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            characters_dir: PathBuf::from(DEFAULT_CHARACTERS_DIR),
            scenes_dir: PathBuf::from(DEFAULT_SCENES_DIR),
            style_dir: PathBuf::from(DEFAULT_STYLE_DIR),
            output_dir: default_output_dir(),
            aspect_ratio: AspectRatio::default(),
            image_count: DEFAULT_IMAGE_COUNT,
            request_delay_ms: 2_000,
            dequeue_timeout_ms: 1_000,
            task_cooldown_ms: 1_000,
            labs_api_base: DEFAULT_LABS_API_BASE.to_string(),
            sandbox_api_base: DEFAULT_SANDBOX_API_BASE.to_string(),
            request_timeout_s: 60,
        }
    }
}

/// `~/Desktop/AutoWhisk_Output`, falling back to the working directory.
pub fn default_output_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Desktop")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_DIR_NAME)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

impl WhiskConfig {
    /// Defaults, then the JSON file (`config_path`, else
    /// `<base_dir>/autowhisk.json` when present), then the environment.
    pub fn load(base_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let implicit = base_dir.join(CONFIG_FILE_NAME);
        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None if implicit.is_file() => Some(implicit),
            None => None,
        };

        let mut config = match file {
            Some(path) => Self::from_file(&path, base_dir)?,
            None => Self {
                base_dir: base_dir.to_path_buf(),
                ..Self::default()
            },
        };
        config.apply_env(non_empty_env);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path, base_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(path.to_path_buf()),
            _ => EngineError::Io(err),
        })?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        let has_base_dir = value.get("base_dir").is_some();
        let mut config: Self = serde_json::from_value(value)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        if !has_base_dir {
            config.base_dir = base_dir.to_path_buf();
        }
        Ok(config)
    }

    /// Applies `AUTOWHISK_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(LABS_API_BASE_ENV) {
            self.labs_api_base = value;
        }
        if let Some(value) = lookup(SANDBOX_API_BASE_ENV) {
            self.sandbox_api_base = value;
        }
        if let Some(value) = lookup(OUTPUT_DIR_ENV) {
            self.output_dir = PathBuf::from(value);
        }
        self.labs_api_base = normalize_api_base(&self.labs_api_base);
        self.sandbox_api_base = normalize_api_base(&self.sandbox_api_base);
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_IMAGE_COUNT..=MAX_IMAGE_COUNT).contains(&self.image_count) {
            return Err(EngineError::Config(format!(
                "image_count must be between {MIN_IMAGE_COUNT} and {MAX_IMAGE_COUNT}, got {}",
                self.image_count
            )));
        }
        if self.request_timeout_s == 0 {
            return Err(EngineError::Config(
                "request_timeout_s must be positive".to_string(),
            ));
        }
        if self.labs_api_base.is_empty() || self.sandbox_api_base.is_empty() {
            return Err(EngineError::Config("API base URLs must not be empty".to_string()));
        }
        Ok(())
    }

    /// Reference directories; relative entries resolve under `base_dir`.
    pub fn folder_layout(&self) -> FolderLayout {
        FolderLayout {
            characters: self.base_dir.join(&self.characters_dir),
            scenes: self.base_dir.join(&self.scenes_dir),
            style: self.base_dir.join(&self.style_dir),
        }
    }

    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints {
            labs_api_base: self.labs_api_base.clone(),
            sandbox_api_base: self.sandbox_api_base.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            output_dir: self.output_dir.clone(),
            aspect_ratio: self.aspect_ratio,
            request_delay: Duration::from_millis(self.request_delay_ms),
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
            task_cooldown: Duration::from_millis(self.task_cooldown_ms),
        }
    }
}
