use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var
    /// DESKPILOT_LLM_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> String {
        std::env::var("DESKPILOT_LLM_API_KEY")
            .unwrap_or_else(|_| self.api_key.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    pub api_base: String,
    /// Falls back to env var DESKPILOT_DESKTOP_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
}

impl DesktopConfig {
    pub fn resolved_api_key(&self) -> String {
        std::env::var("DESKPILOT_DESKTOP_API_KEY")
            .unwrap_or_else(|_| self.api_key.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound on one session loop's wall-clock runtime.
    #[serde(default = "default_max_duration")]
    pub max_loop_duration_secs: u64,
    /// Consecutive recoverable action failures before the loop gives up.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_loop_duration_secs: default_max_duration(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_screen_width() -> u32 {
    1024
}

fn default_screen_height() -> u32 {
    768
}

fn default_max_duration() -> u64 {
    3600
}

fn default_max_failures() -> u32 {
    5
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let _ = dotenvy::dotenv();
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        model = %config.llm.model,
        backend = %config.desktop.api_base,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> PilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
