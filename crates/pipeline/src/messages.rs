//! Core data types flowing through a session's pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-connection session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finalized ASR transcript, the unit of work that starts an utterance.
///
/// Carries a monotonically increasing sequence number within the session so
/// later stages can tell a newer utterance from a stale one.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub session_id: SessionId,
    pub sequence: u64,
    pub text: String,
}

/// A punctuation-bounded fragment of an LLM stream, the unit of TTS synthesis.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub utterance_sequence: u64,
    /// Index of this sentence within its utterance, starting at 0.
    pub index: u32,
    pub text: String,
}

/// A chunk of synthesized PCM16LE audio for a single sentence.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sentence_id: u64,
    /// Monotonic, starts at 1, strictly ascending within a sentence.
    pub chunk_number: u32,
    pub pcm: bytes::Bytes,
}

/// ASR recognition result, either interim or final.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub session_id: SessionId,
    pub text: String,
    pub is_final: bool,
}

/// A JSON event pushed down the WebSocket to the client. `type` is the
/// vendor-neutral tag every frontend built against this protocol switches on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// ASR lifecycle: recognition started or stopped.
    Status { status: AsrStatus },
    /// Interim ASR text, superseded by the next partial or by a final.
    PartialTranscript { content: String },
    /// Finalized ASR text; starts a new utterance.
    FinalTranscript { content: String },
    /// A partial or complete subtitle line for the response currently being
    /// generated.
    Subtitle { content: String, is_complete: bool },
    /// The full response collected so far; `is_complete` marks the final one.
    /// `was_interrupted` is only ever present (and `true`) on the response
    /// that was cut short by a barge-in or explicit interrupt.
    LlmResponse {
        content: String,
        is_complete: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        was_interrupted: Option<bool>,
    },
    LlmStatus { status: LlmStatus },
    TtsStart {
        format: &'static str,
        is_first: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    TtsEnd,
    /// Emitted when in-flight TTS is cancelled by a barge-in interrupt.
    TtsStop,
    StopAcknowledged { queues_cleared: bool },
    InterruptAcknowledged,
    Error { message: String },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrStatus {
    Listening,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStatus {
    Processing,
    Idle,
}

/// Everything the writer stage may need to push to a client connection.
/// Audio chunks are reordered by `chunk_number` before they go out; control
/// events are forwarded as soon as they arrive.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ClientEvent),
    Audio(AudioChunk),
}

/// The envelope every text frame goes out in: every message the client
/// receives carries at least `type` and `session_id` (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub event: ClientEvent,
}
