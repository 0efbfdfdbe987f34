use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Single JSON blob holding the saved chapter list.
    #[serde(default = "default_library_file")]
    pub library_file: String,

    #[serde(default = "default_export_folder")]
    pub export_folder: String,

    #[serde(default)]
    pub generation: GenerationConfig,

    pub gemini: GeminiConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Delay between successive panel requests, to respect service rate limits.
    #[serde(default = "default_pacing_seconds")]
    pub pacing_seconds: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Image generation gets a longer initial backoff than text.
    #[serde(default = "default_image_retry_delay_ms")]
    pub image_retry_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            pacing_seconds: default_pacing_seconds(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            image_retry_delay_ms: default_image_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,
}

fn default_library_file() -> String {
    "library/chapters.json".to_string()
}
fn default_export_folder() -> String {
    "export".to_string()
}
fn default_pacing_seconds() -> u64 {
    15
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_image_retry_delay_ms() -> u64 {
    8000
}
fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one with a gemini api_key.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.library_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::create_dir_all(&self.export_folder)?;
        Ok(())
    }
}
