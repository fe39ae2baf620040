//! Centralized runtime configuration for the voice conversation server.
//!
//! Everything is loaded once at startup from the process environment (with
//! an optional `.env` file merged in via `dotenvy`) into a single [`Config`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a selected provider is missing credentials it needs to run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ASR provider {provider:?} is selected but missing required credentials")]
    MissingAsrCredentials { provider: String },
    #[error("LLM provider {provider:?} is selected but missing required credentials")]
    MissingLlmCredentials { provider: String },
    #[error("TTS provider {provider:?} is selected but missing required credentials")]
    MissingTtsCredentials { provider: String },
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Application configuration, loaded once at process startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Speech recognition backend identifier, e.g. "azure".
    pub asr_provider: String,
    /// Chat completion backend identifier, e.g. "openai".
    pub llm_provider: String,
    /// Speech synthesis backend identifier, e.g. "azure".
    pub tts_provider: String,

    /// Shared speech API key, used by both the ASR and TTS providers when
    /// they share a vendor (mirrors the original's single Azure Speech key).
    pub speech_api_key: Option<String>,
    /// Speech service region/endpoint qualifier (vendor specific).
    pub speech_region: Option<String>,
    /// TTS voice identifier to request from the synthesis provider.
    pub tts_voice: String,

    /// Chat completion API key.
    pub llm_api_key: Option<String>,
    /// Chat completion API base URL; None uses the provider's default.
    pub llm_base_url: Option<String>,
    /// Chat completion model name.
    pub llm_model: String,
    /// System prompt prepended to every conversation.
    pub llm_system_prompt: String,

    /// ASR recognition language hint.
    pub asr_language: String,
    /// VAD energy threshold above which a packet is treated as voiced.
    pub vad_energy_threshold: f32,

    /// Idle-session timeout, in seconds, before the supervisor reaps it.
    pub session_timeout_secs: u64,
    /// Interval, in seconds, between supervisor reaper sweeps.
    pub session_reap_interval_secs: u64,

    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,
    /// Verbose debug logging toggle.
    pub debug: bool,
}

impl Config {
    /// Load configuration from the environment, applying defaults for
    /// anything unset, then validate it.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .set_default("asr_provider", "azure")?
            .set_default("llm_provider", "openai")?
            .set_default("tts_provider", "azure")?
            .set_default("tts_voice", "en-US-AriaNeural")?
            .set_default("llm_model", "gpt-3.5-turbo")?
            .set_default(
                "llm_system_prompt",
                "You are a helpful voice assistant. Keep answers short, conversational, \
                 and free of emoji or other symbols that don't read naturally aloud.",
            )?
            .set_default("asr_language", "en-US")?
            .set_default("vad_energy_threshold", 0.05)?
            .set_default("session_timeout_secs", 600)?
            .set_default("session_reap_interval_secs", 60)?
            .set_default("bind_addr", "0.0.0.0:8080")?
            .set_default("debug", false)?
            .add_source(config::Environment::default().try_parsing(true));

        let cfg: Config = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail startup only for the *selected* provider's missing credentials;
    /// an unselected provider missing keys is logged but not fatal.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.asr_provider == "azure"
            && (self.speech_api_key.is_none() || self.speech_region.is_none())
        {
            return Err(ConfigError::MissingAsrCredentials {
                provider: self.asr_provider.clone(),
            });
        }

        if self.llm_provider == "openai" && self.llm_api_key.is_none() {
            return Err(ConfigError::MissingLlmCredentials {
                provider: self.llm_provider.clone(),
            });
        }
        if self.llm_provider == "openai" {
            tracing::info!(model = %self.llm_model, "using LLM model");
            if let Some(base_url) = &self.llm_base_url {
                tracing::info!(%base_url, "using custom LLM base URL");
            }
        }

        if self.tts_provider == "azure"
            && (self.speech_api_key.is_none() || self.speech_region.is_none())
        {
            return Err(ConfigError::MissingTtsCredentials {
                provider: self.tts_provider.clone(),
            });
        }

        tracing::info!("configuration validated");
        Ok(())
    }
}
