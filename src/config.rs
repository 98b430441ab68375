//! Configuration management: TOML file + environment-variable overrides.
//!
//! Sections mirror SPEC_FULL.md §6.1: telnyx, vad, pipeline, tts,
//! breakers. Each field carries a `#[serde(default = "fn")]` so a
//! partial or missing config file still produces a usable `Config`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telnyx: TelnyxConfig,
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tts: TtsSettings,
    #[serde(default)]
    pub breakers: BreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelnyxConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
    #[serde(default)]
    pub webhook_signing_key: String,
}

fn default_webhook_base_url() -> String {
    "https://localhost:8443".to_string()
}

impl Default for TelnyxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_base_url: default_webhook_base_url(),
            webhook_signing_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_vad_min_silence_ms")]
    pub min_silence_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.5
}
fn default_vad_min_silence_ms() -> u32 {
    500
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            min_silence_ms: default_vad_min_silence_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_filler_delay_ms")]
    pub filler_delay_ms: u64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_call_max_duration_secs")]
    pub call_max_duration_secs: u64,
}

fn default_filler_delay_ms() -> u64 {
    800
}
fn default_max_concurrent_calls() -> usize {
    100
}
fn default_call_max_duration_secs() -> u64 {
    1800
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filler_delay_ms: default_filler_delay_ms(),
            max_concurrent_calls: default_max_concurrent_calls(),
            call_max_duration_secs: default_call_max_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSetting {
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity")]
    pub similarity: f32,
}

fn default_voice_id() -> String {
    "default".to_string()
}
fn default_stability() -> f32 {
    0.5
}
fn default_similarity() -> f32 {
    0.75
}

impl Default for VoiceSetting {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            stability: default_stability(),
            similarity: default_similarity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default)]
    pub sara: VoiceSetting,
    #[serde(default)]
    pub nexus: VoiceSetting,
}

fn default_tts_model() -> String {
    "eleven_flash_v2_5".to_string()
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            model: default_tts_model(),
            sara: VoiceSetting::default(),
            nexus: VoiceSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_secs: Option<u64>,
    pub half_open_max_calls: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default)]
    pub asr: Option<BreakerOverride>,
    #[serde(default)]
    pub llm: Option<BreakerOverride>,
    #[serde(default)]
    pub tts: Option<BreakerOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telnyx: TelnyxConfig::default(),
            vad: VadSettings::default(),
            pipeline: PipelineConfig::default(),
            tts: TtsSettings::default(),
            breakers: BreakerSettings::default(),
        }
    }
}

impl Config {
    /// Load from the TOML config file, creating a default one if
    /// missing, then layer environment-variable overrides on top.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELNYX_API_KEY") {
            self.telnyx.api_key = v;
        }
        if let Ok(v) = std::env::var("TELNYX_WEBHOOK_BASE_URL") {
            self.telnyx.webhook_base_url = v;
        }
        if let Ok(v) = std::env::var("TELNYX_WEBHOOK_SIGNING_KEY") {
            self.telnyx.webhook_signing_key = v;
        }
        if let Ok(v) = std::env::var("VAD_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.vad.threshold = parsed;
            }
        }
        if let Ok(v) = std::env::var("VAD_MIN_SILENCE_MS") {
            if let Ok(parsed) = v.parse() {
                self.vad.min_silence_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_CALLS") {
            if let Ok(parsed) = v.parse() {
                self.pipeline.max_concurrent_calls = parsed;
            }
        }
    }
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "callcore", "callcore")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path.
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "callcore", "callcore")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Print the current configuration to stdout.
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Build the wss:// media-stream URL announced to the carrier for a call.
pub fn media_stream_url(config: &Config, call_control_id: &str) -> String {
    let base = config
        .telnyx
        .webhook_base_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{base}/media/{call_control_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.vad.threshold, config.vad.threshold);
    }

    #[test]
    fn media_stream_url_rewrites_scheme() {
        let mut config = Config::default();
        config.telnyx.webhook_base_url = "https://example.com".to_string();
        assert_eq!(media_stream_url(&config, "c1"), "wss://example.com/media/c1");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: Config = toml::from_str("[vad]\nthreshold = 0.7\n").unwrap();
        assert_eq!(parsed.vad.threshold, 0.7);
        assert_eq!(parsed.pipeline.filler_delay_ms, 800);
    }
}
