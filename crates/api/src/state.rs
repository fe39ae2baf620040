//! Process-wide shared state: configuration, the session registry, and the
//! vendor adapters every new connection borrows from.
//!
//! Mirrors the teacher's single `AppState` handed to `with_state`, but there
//! is no database handle here — the only "repository" this crate owns is the
//! in-memory session registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use voxd_config::Config;
use voxd_pipeline::{
    ChatCompletionClient, HttpSpeechRecognizer, HttpSpeechSynthesizer, OpenAiCompatibleClient,
    SessionId, SessionRegistry, SpeechRecognizer, SpeechSynthesizer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub recognizer_factory: Arc<dyn Fn() -> Arc<dyn SpeechRecognizer> + Send + Sync>,
    pub llm: Arc<dyn ChatCompletionClient>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// One-shot close signal per live connection, fired by the idle reaper
    /// so a reaped session's socket task wakes up and tears itself down
    /// instead of lingering after its registry entry is already gone.
    pub close_signals: Arc<DashMap<SessionId, oneshot::Sender<()>>>,
}

impl AppState {
    /// Builds the shared HTTP client once and wires up one concrete adapter
    /// per trait from it, per `config`'s provider selection. A fresh
    /// recognizer is still handed out per session (it carries per-session
    /// streaming state), but they all share this one pooled client.
    pub fn new(config: Config) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(50)
            .build()
            .expect("building the shared HTTP client must not fail");

        let config = Arc::new(config);
        let sessions = Arc::new(SessionRegistry::new());

        let asr_client = client.clone();
        let asr_endpoint = asr_endpoint(&config);
        let asr_language = config.asr_language.clone();
        let recognizer_factory: Arc<dyn Fn() -> Arc<dyn SpeechRecognizer> + Send + Sync> =
            Arc::new(move || {
                Arc::new(HttpSpeechRecognizer::new(
                    asr_client.clone(),
                    asr_endpoint.clone(),
                    asr_language.clone(),
                )) as Arc<dyn SpeechRecognizer>
            });

        let llm: Arc<dyn ChatCompletionClient> = Arc::new(OpenAiCompatibleClient::new(
            client.clone(),
            config
                .llm_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
            config.llm_system_prompt.clone(),
        ));

        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSpeechSynthesizer::new(
            client,
            tts_endpoint(&config),
            config.tts_voice.clone(),
            config.speech_api_key.clone().unwrap_or_default(),
        ));

        Self {
            config,
            sessions,
            recognizer_factory,
            llm,
            tts,
            close_signals: Arc::new(DashMap::new()),
        }
    }
}

fn asr_endpoint(config: &Config) -> String {
    let region = config.speech_region.as_deref().unwrap_or("eastus");
    format!("https://{region}.stt.speech.microsoft.com/speech/recognition/stream")
}

fn tts_endpoint(config: &Config) -> String {
    let region = config.speech_region.as_deref().unwrap_or("eastus");
    format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
}
