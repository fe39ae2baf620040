//! Per-session streaming pipeline: recognize -> generate -> synthesize.
//!
//! This crate owns everything in `spec.md`'s core scope except the concrete
//! transport and the vendor SDKs themselves: session state, the barge-in
//! model, the inter-stage queues, the sentence segmenter, TTS chunk framing,
//! VAD, and the client-facing message types. The `crates/api` crate wires
//! this onto an actual WebSocket connection.

pub mod asr;
pub mod llm;
pub mod messages;
pub mod segmenter;
pub mod session;
pub mod stages;
pub mod supervisor;
pub mod tts;
pub mod vad;
pub mod writer;

pub use asr::{AsrError, SpeechRecognizer};
pub use asr::http::HttpSpeechRecognizer;
pub use llm::{ChatCompletionClient, LlmError, OpenAiCompatibleClient};
pub use messages::{
    AsrStatus, AudioChunk, ClientEvent, LlmStatus, Outbound, Sentence, ServerMessage, SessionId, TranscriptEvent,
    Utterance,
};
pub use segmenter::SentenceSegmenter;
pub use session::{Session, SessionRegistry};
pub use stages::{run_asr_stage, run_llm_stage, run_tts_stage};
pub use supervisor::run_idle_reaper;
pub use tts::{HttpSpeechSynthesizer, SpeechSynthesizer, TtsError, TtsEvent};
pub use vad::VoiceActivityDetector;
pub use writer::{Transport, WriterError, run_writer};
