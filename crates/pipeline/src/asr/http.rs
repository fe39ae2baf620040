//! A streaming recognizer that pushes raw PCM frames to an HTTP endpoint and
//! reads newline-delimited JSON transcript events back.
//!
//! The forwarding of audio and the reading of results run on separate tasks
//! connected only by channels, so a slow or stalled vendor response can
//! never block audio ingestion — the same isolation the NIM gRPC backend
//! uses, generalized away from a specific RPC transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{AsrError, SpeechRecognizer};
use crate::messages::{SessionId, TranscriptEvent};

#[derive(Debug, Deserialize)]
struct VendorEvent {
    text: String,
    #[serde(default)]
    is_final: bool,
}

/// Recognizer speaking to an HTTP endpoint that accepts a stream of raw PCM
/// bytes (via chunked POST) and replies with one JSON object per line.
pub struct HttpSpeechRecognizer {
    client: reqwest::Client,
    endpoint: String,
    language: String,
    audio_tx: Mutex<Option<mpsc::Sender<bytes::Bytes>>>,
    last_partial: Arc<Mutex<Option<String>>>,
    events: Mutex<Option<(SessionId, mpsc::Sender<TranscriptEvent>)>>,
}

impl HttpSpeechRecognizer {
    pub fn new(client: reqwest::Client, endpoint: String, language: String) -> Self {
        Self {
            client,
            endpoint,
            language,
            audio_tx: Mutex::new(None),
            last_partial: Arc::new(Mutex::new(None)),
            events: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechRecognizer {
    async fn start(&self, session_id: SessionId, events: mpsc::Sender<TranscriptEvent>) -> Result<(), AsrError> {
        let (audio_tx, audio_rx) = mpsc::channel::<bytes::Bytes>(64);
        *self.audio_tx.lock().await = Some(audio_tx);
        *self.events.lock().await = Some((session_id, events.clone()));

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let language = self.language.clone();
        let last_partial = self.last_partial.clone();

        tokio::spawn(async move {
            let body = reqwest::Body::wrap_stream(tokio_stream_from_channel(audio_rx));
            let response = match client
                .post(&endpoint)
                .query(&[("language", language.as_str())])
                .body(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "ASR request failed");
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "ASR stream read error");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let event: VendorEvent = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "malformed ASR event, skipping");
                            continue;
                        }
                    };
                    if event.text.trim().is_empty() {
                        continue;
                    }
                    if !event.is_final {
                        *last_partial.lock().await = Some(event.text.clone());
                    } else {
                        *last_partial.lock().await = None;
                    }
                    let transcript = TranscriptEvent {
                        session_id,
                        text: event.text,
                        is_final: event.is_final,
                    };
                    if events.send(transcript).await.is_err() {
                        debug!("transcript receiver dropped, stopping ASR result loop");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), AsrError> {
        self.audio_tx.lock().await.take();

        let stale_partial = self.last_partial.lock().await.take();
        if let Some(text) = stale_partial
            && !text.trim().is_empty()
            && let Some((session_id, events)) = self.events.lock().await.clone()
        {
            let _ = events
                .send(TranscriptEvent {
                    session_id,
                    text,
                    is_final: true,
                })
                .await;
        }

        Ok(())
    }

    fn feed_audio(&self, pcm: &[u8]) {
        if let Ok(guard) = self.audio_tx.try_lock()
            && let Some(tx) = guard.as_ref()
        {
            let _ = tx.try_send(bytes::Bytes::copy_from_slice(pcm));
        }
    }

    fn clear_partial(&self) {
        if let Ok(mut guard) = self.last_partial.try_lock() {
            *guard = None;
        }
    }
}

fn tokio_stream_from_channel(
    mut rx: mpsc::Receiver<bytes::Bytes>,
) -> impl futures::Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx).map(|opt| opt.map(Ok)))
}
