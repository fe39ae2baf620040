//! Streaming speech recognition adapter.
//!
//! The vendor SDK itself is out of scope; this module defines the capability
//! boundary (`start` / `stop` / `feed_audio` / event stream) every backend
//! must expose, plus one HTTP/WebSocket-based reference implementation.

pub mod http;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{SessionId, TranscriptEvent};

#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("recognizer not running")]
    NotRunning,
}

/// A streaming speech recognizer bound to one session.
///
/// Implementations run their vendor I/O on an isolated task fed by
/// [`feed_audio`](SpeechRecognizer::feed_audio) and reporting results on the
/// channel handed to [`start`](SpeechRecognizer::start) — audio in, events
/// out, never direct calls across the scheduling boundary.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Starts recognition, spawning whatever background task the backend
    /// needs. `events` receives partial and final transcripts.
    async fn start(&self, session_id: SessionId, events: mpsc::Sender<TranscriptEvent>) -> Result<(), AsrError>;

    /// Stops recognition. If a non-empty partial was the last result seen
    /// and no final ever arrived, the backend promotes it to a final before
    /// returning, so a spoken utterance is never silently dropped.
    async fn stop(&self) -> Result<(), AsrError>;

    /// Feeds one packet of PCM16LE@16kHz mono audio to the recognizer.
    fn feed_audio(&self, pcm: &[u8]);

    /// Clears any stale partial result — used by the `reset` command so a
    /// pre-reset partial can never be promoted to a final afterward.
    fn clear_partial(&self);
}
