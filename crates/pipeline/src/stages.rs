//! The three pipeline stages connecting ASR output to synthesized audio.
//!
//! Stage A forwards a finished utterance to the LLM stage, first tearing
//! down whatever TTS work was still running for the previous turn. Stage B
//! streams the LLM's response, splitting it into sentences as they
//! complete. Stage C synthesizes one sentence at a time, never starting the
//! next until the previous one has finished or been cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use crate::llm::ChatCompletionClient;
use crate::messages::{AudioChunk, ClientEvent, LlmStatus, Outbound, Sentence, Utterance};

/// Canned reply substituted for whatever the LLM had produced so far when a
/// barge-in or explicit `interrupt` cuts a response off mid-stream.
const INTERRUPTED_REPLY: &str = "对话被中断";

/// How long Stage B waits for the next token before giving up on a stalled
/// LLM stream and surfacing an error instead of hanging the session forever.
const LLM_STREAM_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

use crate::segmenter::SentenceSegmenter;
use crate::session::Session;
use crate::tts::{SpeechSynthesizer, TtsEvent};

/// Stage A: one finished utterance in, one `Sentence`-queue feed in.
///
/// Every new utterance immediately emits `tts_stop` and aborts whatever TTS
/// playback is still in flight for the previous turn — a fresh user
/// utterance always takes priority over finishing the old response.
pub async fn run_asr_stage(
    session: Arc<Session>,
    mut asr_in: mpsc::Receiver<Utterance>,
    llm_in: mpsc::Sender<Utterance>,
    outbound: mpsc::Sender<Outbound>,
) {
    while let Some(utterance) = asr_in.recv().await {
        if outbound.send(Outbound::Event(ClientEvent::TtsStop)).await.is_err() {
            return;
        }
        session.request_interrupt().await;
        session.set_current_sequence(utterance.sequence);
        session.clear_interrupt().await;

        if llm_in.send(utterance).await.is_err() {
            return;
        }
    }
}

/// Stage B: utterance in, segmented sentences out. Only one LLM generation
/// runs at a time per session; a new utterance arriving mid-stream cancels
/// whatever generation is still in flight (handled by [`Session::set_llm_task`]
/// replacing the stored handle).
pub async fn run_llm_stage(
    session: Arc<Session>,
    llm: Arc<dyn ChatCompletionClient>,
    mut llm_in: mpsc::Receiver<Utterance>,
    tts_in: mpsc::Sender<Sentence>,
    outbound: mpsc::Sender<Outbound>,
) {
    while let Some(utterance) = llm_in.recv().await {
        let session = session.clone();
        let llm = llm.clone();
        let tts_in = tts_in.clone();
        let outbound = outbound.clone();
        let interrupt = session.interrupt_token().await;

        let handle = tokio::spawn(async move {
            process_llm_response(session, llm, utterance, tts_in, outbound, interrupt).await;
        });
        session.set_llm_task(handle).await;
    }
}

async fn process_llm_response(
    session: Arc<Session>,
    llm: Arc<dyn ChatCompletionClient>,
    utterance: Utterance,
    tts_in: mpsc::Sender<Sentence>,
    outbound: mpsc::Sender<Outbound>,
    interrupt: tokio_util::sync::CancellationToken,
) {
    session.set_processing_llm(true);
    let _ = outbound
        .send(Outbound::Event(ClientEvent::LlmStatus {
            status: LlmStatus::Processing,
        }))
        .await;

    let mut receiver = match llm.generate(&utterance.text).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "LLM generation failed to start");
            session.set_processing_llm(false);
            return;
        }
    };

    let mut collected = String::new();
    let mut segmenter = SentenceSegmenter::new();
    let mut sentence_index = 0u32;

    loop {
        tokio::select! {
            _ = interrupt.cancelled() => {
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::LlmResponse {
                        content: INTERRUPTED_REPLY.to_string(),
                        is_complete: true,
                        was_interrupted: Some(true),
                    }))
                    .await;
                session.set_processing_llm(false);
                return;
            }
            _ = tokio::time::sleep(LLM_STREAM_IDLE_TIMEOUT) => {
                warn!("LLM stream produced no tokens within the idle timeout");
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Error {
                        message: "language model stream timed out".into(),
                    }))
                    .await;
                session.set_processing_llm(false);
                return;
            }
            chunk = receiver.recv() => {
                let Some(chunk) = chunk else { break };
                let delta = match chunk {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, "LLM stream errored");
                        let _ = outbound
                            .send(Outbound::Event(ClientEvent::Error {
                                message: "language model stream failed".into(),
                            }))
                            .await;
                        session.set_processing_llm(false);
                        return;
                    }
                };

                collected.push_str(&delta);
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Subtitle {
                        content: delta.clone(),
                        is_complete: false,
                    }))
                    .await;

                for sentence_text in segmenter.push(&delta) {
                    if dispatch_sentence(
                        &utterance,
                        sentence_text,
                        &mut sentence_index,
                        &tts_in,
                        &outbound,
                    )
                    .await
                    .is_err()
                    {
                        session.set_processing_llm(false);
                        return;
                    }
                }

                let _ = outbound
                    .send(Outbound::Event(ClientEvent::LlmResponse {
                        content: collected.clone(),
                        is_complete: false,
                        was_interrupted: None,
                    }))
                    .await;
            }
        }
    }

    if let Some(remainder) = segmenter.finish() {
        let _ = dispatch_sentence(&utterance, remainder, &mut sentence_index, &tts_in, &outbound).await;
    }

    let _ = outbound
        .send(Outbound::Event(ClientEvent::LlmResponse {
            content: collected,
            is_complete: true,
            was_interrupted: None,
        }))
        .await;
    session.set_processing_llm(false);
}

async fn dispatch_sentence(
    utterance: &Utterance,
    text: String,
    sentence_index: &mut u32,
    tts_in: &mpsc::Sender<Sentence>,
    outbound: &mpsc::Sender<Outbound>,
) -> Result<(), ()> {
    let _ = outbound
        .send(Outbound::Event(ClientEvent::Subtitle {
            content: text.clone(),
            is_complete: true,
        }))
        .await;

    let sentence = Sentence {
        utterance_sequence: utterance.sequence,
        index: *sentence_index,
        text,
    };
    *sentence_index += 1;
    tts_in.send(sentence).await.map_err(|_| ())
}

/// Stage C: one sentence synthesized at a time, gated by a completion
/// signal so the next sentence's audio never starts interleaving with the
/// previous one's.
pub async fn run_tts_stage(
    session: Arc<Session>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut tts_in: mpsc::Receiver<Sentence>,
    outbound: mpsc::Sender<Outbound>,
) {
    let completion_gate = Arc::new(Notify::new());
    completion_gate.notify_one();
    let next_sentence_id = AtomicU64::new(0);

    while let Some(sentence) = tts_in.recv().await {
        if !session.is_current(sentence.utterance_sequence) {
            // Left over from an utterance superseded before this sentence
            // reached synthesis; drop it without consuming a gate turn.
            continue;
        }
        completion_gate.notified().await;

        let session = session.clone();
        let synthesizer = synthesizer.clone();
        let outbound = outbound.clone();
        let gate = completion_gate.clone();
        let interrupt = session.interrupt_token().await;
        let sentence_id = next_sentence_id.fetch_add(1, Ordering::SeqCst);
        let is_first = sentence.index == 0;

        let handle = tokio::spawn(async move {
            synthesize_sentence(session, synthesizer, sentence, sentence_id, is_first, outbound, interrupt).await;
            gate.notify_one();
        });
        session.set_tts_task(handle).await;
    }
}

async fn synthesize_sentence(
    session: Arc<Session>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sentence: Sentence,
    sentence_id: u64,
    is_first: bool,
    outbound: mpsc::Sender<Outbound>,
    interrupt: tokio_util::sync::CancellationToken,
) {
    session.set_tts_active(true);
    info!(text = %sentence.text, "starting speech synthesis");
    let sentence_text = sentence.text.clone();

    let (tx, mut rx) = mpsc::channel(32);
    let synth = tokio::spawn(async move { synthesizer.synthesize(&sentence.text, is_first, tx, interrupt).await });

    let mut chunk_number = 0u32;
    while let Some(event) = rx.recv().await {
        match event {
            TtsEvent::Start { is_first } => {
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::TtsStart {
                        format: "pcm",
                        is_first,
                        text: Some(sentence_text.clone()),
                    }))
                    .await;
            }
            TtsEvent::Chunk(pcm) => {
                chunk_number += 1;
                let _ = outbound
                    .send(Outbound::Audio(AudioChunk {
                        sentence_id,
                        chunk_number,
                        pcm,
                    }))
                    .await;
            }
            TtsEvent::End => {
                let _ = outbound.send(Outbound::Event(ClientEvent::TtsEnd)).await;
            }
            TtsEvent::Stopped => {
                let _ = outbound.send(Outbound::Event(ClientEvent::TtsStop)).await;
            }
        }
    }

    if let Ok(Err(e)) = synth.await {
        error!(error = %e, "TTS synthesis failed");
        let _ = outbound
            .send(Outbound::Event(ClientEvent::Error {
                message: "speech synthesis failed".into(),
            }))
            .await;
    }

    session.set_tts_active(false);
}
