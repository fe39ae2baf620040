//! Speech synthesis stage: given one sentence, streams back PCM audio.
//!
//! The concrete implementation below speaks the Server-Sent-Events style
//! wire format seen from TTS vendors: line-buffered `data: {...}` frames
//! carrying hex-encoded PCM, which must be decoded and sanity-checked before
//! it's handed to the writer.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("vendor returned an error status: {status_code} {status_msg}")]
    Vendor { status_code: i64, status_msg: String },
}

/// Events emitted while synthesizing one sentence.
#[derive(Debug)]
pub enum TtsEvent {
    /// Emitted once before the first audio chunk.
    Start { is_first: bool },
    Chunk(bytes::Bytes),
    /// Synthesis completed normally.
    End,
    /// Synthesis was cancelled; no `End` follows.
    Stopped,
}

/// Speech synthesizer bound to one sentence at a time.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text`, reporting progress on `out`. Checked for
    /// cancellation between chunks; on cancellation emits `Stopped` and
    /// returns without emitting `End`.
    async fn synthesize(
        &self,
        text: &str,
        is_first: bool,
        out: mpsc::Sender<TtsEvent>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError>;
}

#[derive(Debug, Deserialize)]
struct VendorFrame {
    #[serde(default)]
    base_resp: Option<VendorStatus>,
    #[serde(default)]
    data: Option<VendorAudioData>,
}

#[derive(Debug, Deserialize)]
struct VendorStatus {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Debug, Deserialize)]
struct VendorAudioData {
    audio: Option<String>,
}

/// HTTP/SSE-based synthesizer, matching the vendor shape this system was
/// distilled from: hex-encoded PCM16LE@16kHz mono embedded in JSON frames.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    voice_id: String,
    api_key: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: reqwest::Client, endpoint: String, voice_id: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            voice_id,
            api_key,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        is_first: bool,
        out: mpsc::Sender<TtsEvent>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError> {
        let body = serde_json::json!({
            "text": text,
            "stream": true,
            "voice_setting": { "voice_id": self.voice_id },
            "audio_setting": { "sample_rate": 16000, "format": "pcm", "channel": 1 },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if out.send(TtsEvent::Start { is_first }).await.is_err() {
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = out.send(TtsEvent::Stopped).await;
                    return Ok(());
                }
                next = stream.next() => {
                    let Some(chunk) = next else { break };
                    let chunk = chunk?;
                    if chunk.is_empty() || chunk.as_ref() == b"\n" {
                        continue;
                    }
                    buffer.extend_from_slice(&chunk);

                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = &line[..line.len() - 1];
                        if line.is_empty() {
                            continue;
                        }
                        let Some(json_bytes) = strip_data_prefix(line) else {
                            continue;
                        };
                        let frame: VendorFrame = match serde_json::from_slice(json_bytes) {
                            Ok(f) => f,
                            Err(e) => {
                                warn!(error = %e, "malformed TTS frame, skipping");
                                continue;
                            }
                        };

                        if let Some(status) = frame.base_resp
                            && status.status_code != 0
                        {
                            warn!(
                                status_code = status.status_code,
                                status_msg = %status.status_msg,
                                "TTS vendor reported an error, skipping chunk"
                            );
                            continue;
                        }

                        let Some(audio_hex) = frame.data.and_then(|d| d.audio) else {
                            continue;
                        };
                        if audio_hex.is_empty() {
                            continue;
                        }

                        let Ok(mut decoded) = hex::decode(&audio_hex) else {
                            warn!("TTS audio hex decode failed, dropping chunk");
                            continue;
                        };
                        if decoded.is_empty() {
                            continue;
                        }
                        if decoded.len() % 2 != 0 {
                            decoded.pop();
                        }
                        if !is_plausible_pcm(&decoded) {
                            warn!("TTS chunk failed PCM sanity check, dropping");
                            continue;
                        }

                        if out.send(TtsEvent::Chunk(bytes::Bytes::from(decoded))).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        let _ = out.send(TtsEvent::End).await;
        Ok(())
    }
}

fn strip_data_prefix(line: &[u8]) -> Option<&[u8]> {
    if let Some(rest) = line.strip_prefix(b"data: ") {
        Some(rest)
    } else {
        line.strip_prefix(b"data:")
    }
}

/// At least 90% of the first 10 samples must lie within i16 range — they
/// always will once decoded as `i16`, so this really checks that the buffer
/// decodes to sane, not-wildly-clipped amplitude data.
fn is_plausible_pcm(pcm: &[u8]) -> bool {
    let sample_count = (pcm.len() / 2).min(10);
    if sample_count == 0 {
        return false;
    }
    let mut invalid = 0;
    for i in 0..sample_count {
        let sample = i16::from_le_bytes([pcm[i * 2], pcm[i * 2 + 1]]);
        if sample.unsigned_abs() as u32 > 32767 {
            invalid += 1;
        }
    }
    invalid <= 2
}
