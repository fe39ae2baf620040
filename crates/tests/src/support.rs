//! Test doubles and a minimal real HTTP/WebSocket server used by the
//! integration tests in this crate. No test here runs the toolchain's own
//! test harness against a vendor network call — every ASR/LLM/TTS adapter
//! is a scripted stand-in, wired through the exact same `AppState`/router
//! the real binary uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use voxd_api::state::AppState;
use voxd_config::Config;
use voxd_pipeline::{
    AsrError, ChatCompletionClient, LlmError, SessionId, SessionRegistry, SpeechRecognizer,
    SpeechSynthesizer, TranscriptEvent, TtsError, TtsEvent,
};

/// A recognizer whose transcripts are driven entirely by the test calling
/// [`ScriptedRecognizer::emit`]/[`ScriptedRecognizer::emit_to`] — there is no
/// audio decoding here, only the `start`/`stop` lifecycle the connection
/// handler actually depends on. Keyed by session id so one instance can be
/// shared across several concurrent connections (needed for cross-session
/// isolation tests).
#[derive(Default)]
pub struct ScriptedRecognizer {
    sessions: DashMap<SessionId, mpsc::Sender<TranscriptEvent>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes one transcript event through the single session that has
    /// called `start`. Panics if zero or more than one session is active —
    /// use [`ScriptedRecognizer::emit_to`] when driving several connections
    /// at once.
    pub async fn emit(&self, text: impl Into<String>, is_final: bool) {
        let (session_id, tx) = {
            let entry = self
                .sessions
                .iter()
                .next()
                .expect("emit() requires exactly one started session; use emit_to for multi-session tests");
            (*entry.key(), entry.value().clone())
        };
        let _ = tx
            .send(TranscriptEvent {
                session_id,
                text: text.into(),
                is_final,
            })
            .await;
    }

    /// Pushes one transcript event through a specific session's channel,
    /// for tests driving more than one connection concurrently.
    pub async fn emit_to(&self, session_id: SessionId, text: impl Into<String>, is_final: bool) {
        let tx = self.sessions.get(&session_id).map(|entry| entry.clone());
        if let Some(tx) = tx {
            let _ = tx
                .send(TranscriptEvent {
                    session_id,
                    text: text.into(),
                    is_final,
                })
                .await;
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(&self, session_id: SessionId, events: mpsc::Sender<TranscriptEvent>) -> Result<(), AsrError> {
        self.sessions.insert(session_id, events);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AsrError> {
        Ok(())
    }

    fn feed_audio(&self, _pcm: &[u8]) {}

    fn clear_partial(&self) {}
}

/// An LLM stand-in that replays a fixed list of text deltas, pacing them
/// with `delay` between sends so a test has a window to act (send audio,
/// send `interrupt`) while generation is still in flight.
pub struct ScriptedLlmClient {
    deltas: Vec<String>,
    delay: Duration,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(deltas: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            delay,
        }
    }
}

#[async_trait]
impl ChatCompletionClient for ScriptedLlmClient {
    async fn generate(&self, _text: &str) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let (tx, rx) = mpsc::channel(16);
        let deltas = self.deltas.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            for delta in deltas {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// An LLM stand-in that hands out a *different* delta list on each successive
/// call to `generate`, so a test driving two utterances over the same
/// connection (which only gets one `ChatCompletionClient` for its whole
/// lifetime) can tell which utterance's reply is which by content.
pub struct SequencedLlmClient {
    replies: Vec<Vec<String>>,
    delay: Duration,
    call_count: std::sync::atomic::AtomicUsize,
}

impl SequencedLlmClient {
    pub fn new<I, J, S>(replies: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = J>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies
                .into_iter()
                .map(|deltas| deltas.into_iter().map(Into::into).collect())
                .collect(),
            delay,
            call_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatCompletionClient for SequencedLlmClient {
    async fn generate(&self, _text: &str) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let call = self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let deltas = self.replies.get(call).cloned().unwrap_or_default();
        let (tx, rx) = mpsc::channel(16);
        let delay = self.delay;

        tokio::spawn(async move {
            for delta in deltas {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// A TTS stand-in that emits a fixed number of tiny PCM chunks per sentence,
/// pacing them with `chunk_delay` so a barge-in has time to land mid-synthesis.
pub struct ScriptedTtsSynthesizer {
    chunk_delay: Duration,
    chunks_per_sentence: usize,
}

impl ScriptedTtsSynthesizer {
    pub fn new(chunk_delay: Duration, chunks_per_sentence: usize) -> Self {
        Self {
            chunk_delay,
            chunks_per_sentence,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedTtsSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        is_first: bool,
        out: mpsc::Sender<TtsEvent>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError> {
        let _ = out.send(TtsEvent::Start { is_first }).await;

        for _ in 0..self.chunks_per_sentence {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = out.send(TtsEvent::Stopped).await;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }
            let _ = out.send(TtsEvent::Chunk(bytes::Bytes::from_static(b"\x01\x02"))).await;
        }

        let _ = out.send(TtsEvent::End).await;
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        asr_provider: "azure".into(),
        llm_provider: "openai".into(),
        tts_provider: "azure".into(),
        speech_api_key: Some("test-key".into()),
        speech_region: Some("eastus".into()),
        tts_voice: "en-US-AriaNeural".into(),
        llm_api_key: Some("sk-test".into()),
        llm_base_url: None,
        llm_model: "gpt-3.5-turbo".into(),
        llm_system_prompt: "test assistant".into(),
        asr_language: "en-US".into(),
        vad_energy_threshold: 0.05,
        session_timeout_secs: 600,
        session_reap_interval_secs: 60,
        bind_addr: "0.0.0.0:0".into(),
        debug: false,
    }
}

/// A real `voxd-api` router bound to an ephemeral localhost port, backed by
/// whichever test-double adapters the caller provides.
pub struct TestServer {
    pub addr: std::net::SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        llm: Arc<dyn ChatCompletionClient>,
        tts: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let config = Arc::new(test_config());
        let sessions = Arc::new(SessionRegistry::new());

        let recognizer_for_factory = recognizer.clone();
        let recognizer_factory: Arc<dyn Fn() -> Arc<dyn SpeechRecognizer> + Send + Sync> =
            Arc::new(move || recognizer_for_factory.clone());

        let state = AppState {
            config,
            sessions,
            recognizer_factory,
            llm,
            tts,
            close_signals: Arc::new(DashMap::new()),
        };

        let router = voxd_api::build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral test port");
        let addr = listener.local_addr().expect("ephemeral port has a local addr");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { addr, handle }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(url: &str) -> WsStream {
    let (stream, _response) = connect_async(url).await.expect("connect to test server");
    stream
}

pub async fn send_json(stream: &mut WsStream, value: serde_json::Value) {
    stream
        .send(WsMessage::text(value.to_string()))
        .await
        .expect("send json command");
}

pub async fn send_binary(stream: &mut WsStream, data: Vec<u8>) {
    stream.send(WsMessage::binary(data)).await.expect("send binary frame");
}

/// Waits (with a generous bound) for a text frame whose decoded JSON
/// satisfies `predicate`, ignoring everything else in between.
pub async fn recv_until(
    stream: &mut WsStream,
    mut predicate: impl FnMut(&serde_json::Value) -> bool,
    timeout: Duration,
) -> serde_json::Value {
    tokio::time::timeout(timeout, async {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON event");
                    if predicate(&value) {
                        return value;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("websocket error while waiting for event: {e}"),
                None => panic!("websocket closed before the expected event arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for expected event")
}

/// Collects every decoded event up to and including the one for which `stop`
/// returns `true`, for ordering assertions across several events at once.
pub async fn collect_until(
    stream: &mut WsStream,
    mut stop: impl FnMut(&serde_json::Value) -> bool,
    timeout: Duration,
) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON event");
                    let done = stop(&value);
                    events.push(value);
                    if done {
                        return;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return,
            }
        }
    })
    .await;
    events
}

/// Drains frames for `window`, collecting every `type` seen — used to assert
/// an event was *not* emitted within a bounded window (e.g. no second
/// `tts_start` after a barge-in).
pub async fn collect_event_types(stream: &mut WsStream, window: Duration) -> Vec<String> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(window, async {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON event");
                    if let Some(ty) = value.get("type").and_then(|t| t.as_str()) {
                        seen.push(ty.to_string());
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return,
            }
        }
    })
    .await;
    seen
}

pub fn audio_frame(pcm: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + pcm.len());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(pcm);
    frame
}

/// Loud PCM16LE samples, well above the default VAD energy threshold.
pub fn loud_pcm(sample_count: usize) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(sample_count * 2);
    for _ in 0..sample_count {
        pcm.extend_from_slice(&20_000i16.to_le_bytes());
    }
    pcm
}

/// Pulls the `session_id` envelope field out of a decoded server message —
/// every message carries one (spec.md §6) — for tests driving more than one
/// connection that need to address a specific session.
pub fn session_id_of(value: &serde_json::Value) -> SessionId {
    serde_json::from_value(value["session_id"].clone()).expect("message envelope carries a session_id")
}
