//! The `/ws` connection handler: one task per client, owning a session end
//! to end — reading framed audio/commands in, wiring the pipeline stages,
//! and tearing everything down cleanly on disconnect.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use voxd_pipeline::{
    run_asr_stage, run_llm_stage, run_tts_stage, run_writer, AsrStatus, ClientEvent, Outbound,
    Session, SessionId, SpeechRecognizer, TranscriptEvent, Utterance, VoiceActivityDetector,
};

use crate::state::AppState;
use crate::ws::diagnostics::AudioDiagnostics;
use crate::ws::transport::AxumTransport;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Inbound JSON commands, discriminated by `type` (spec.md §4.1 / §6).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Start,
    Stop,
    Reset,
    Interrupt,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = state.sessions.create();
    let session_id = session.id;
    info!(%session_id, "session connected");

    let (ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);
    let (asr_tx, asr_rx) = mpsc::channel::<Utterance>(8);
    let (llm_tx, llm_rx) = mpsc::channel::<Utterance>(8);
    let (tts_tx, tts_rx) = mpsc::channel(32);
    let (events_tx, mut events_rx) = mpsc::channel::<TranscriptEvent>(32);
    let (close_tx, mut close_rx) = tokio::sync::oneshot::channel::<()>();
    state.close_signals.insert(session_id, close_tx);

    let writer_handle = tokio::spawn(run_writer(session_id, AxumTransport::new(ws_sink), outbound_rx));
    let asr_stage_handle = tokio::spawn(run_asr_stage(session.clone(), asr_rx, llm_tx, outbound_tx.clone()));
    let llm_stage_handle = tokio::spawn(run_llm_stage(
        session.clone(),
        state.llm.clone(),
        llm_rx,
        tts_tx,
        outbound_tx.clone(),
    ));
    let tts_stage_handle = tokio::spawn(run_tts_stage(session.clone(), state.tts.clone(), tts_rx, outbound_tx.clone()));

    let mut recognizer: std::sync::Arc<dyn SpeechRecognizer> = (state.recognizer_factory)();
    let mut asr_listening = false;
    let mut vad = VoiceActivityDetector::new(state.config.vad_energy_threshold);
    let mut diagnostics = AudioDiagnostics::new();
    let mut next_sequence: u64 = 0;

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let Some(frame) = frame else { break };
                session.update_activity().await;
                match frame {
                    Ok(Message::Binary(data)) => {
                        handle_audio_frame(
                            &data,
                            &recognizer,
                            asr_listening,
                            &mut vad,
                            &mut diagnostics,
                            &session,
                            &outbound_tx,
                        )
                        .await;
                    }
                    Ok(Message::Text(text)) => {
                        handle_command(
                            &text,
                            &mut recognizer,
                            &mut asr_listening,
                            &session,
                            session_id,
                            &state,
                            &events_tx,
                            &outbound_tx,
                        )
                        .await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%session_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { continue };
                handle_transcript_event(event, &mut next_sequence, &asr_tx, &outbound_tx).await;
            }
            _ = &mut close_rx => {
                info!(%session_id, "session reaped by idle supervisor");
                break;
            }
        }
    }

    info!(%session_id, "session disconnecting");
    state.close_signals.remove(&session_id);
    let _ = recognizer.stop().await;
    session.request_interrupt().await;
    asr_stage_handle.abort();
    llm_stage_handle.abort();
    tts_stage_handle.abort();
    drop(outbound_tx);
    let _ = writer_handle.await;
    state.sessions.remove(&session_id);
}

async fn handle_audio_frame(
    data: &[u8],
    recognizer: &std::sync::Arc<dyn SpeechRecognizer>,
    asr_listening: bool,
    vad: &mut VoiceActivityDetector,
    diagnostics: &mut AudioDiagnostics,
    session: &Session,
    outbound: &mpsc::Sender<Outbound>,
) {
    // `[4-byte LE timestamp][4-byte LE status flags][PCM bytes]`; anything
    // too short to carry at least one PCM sample past the header is noise.
    if data.len() < 10 {
        return;
    }
    let pcm = &data[8..];
    diagnostics.record(pcm);

    if asr_listening {
        recognizer.feed_audio(pcm);
    }

    let has_voice = vad.detect(pcm);
    if has_voice && (session.is_tts_active() || session.is_processing_llm()) && vad.has_continuous_voice() {
        vad.reset();
        let _ = outbound.send(Outbound::Event(ClientEvent::TtsStop)).await;
        session.request_interrupt().await;
        session.clear_interrupt().await;
    }
}

async fn handle_command(
    text: &str,
    recognizer: &mut std::sync::Arc<dyn SpeechRecognizer>,
    asr_listening: &mut bool,
    session: &Session,
    session_id: SessionId,
    state: &AppState,
    events_tx: &mpsc::Sender<TranscriptEvent>,
    outbound: &mpsc::Sender<Outbound>,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            warn!(%session_id, error = %e, "malformed client command");
            let _ = outbound
                .send(Outbound::Event(ClientEvent::Error {
                    message: "malformed command".into(),
                }))
                .await;
            return;
        }
    };

    match command {
        ClientCommand::Start => {
            if !*asr_listening {
                if let Err(e) = recognizer.start(session_id, events_tx.clone()).await {
                    warn!(%session_id, error = %e, "failed to start ASR");
                    let _ = outbound
                        .send(Outbound::Event(ClientEvent::Error {
                            message: "failed to start recognition".into(),
                        }))
                        .await;
                    return;
                }
                *asr_listening = true;
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Status { status: AsrStatus::Listening }))
                    .await;
            }
        }
        ClientCommand::Stop => {
            if *asr_listening {
                let _ = recognizer.stop().await;
                *asr_listening = false;
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Status { status: AsrStatus::Stopped }))
                    .await;
            }
            interrupt_current_utterance(session, outbound).await;
            let _ = outbound
                .send(Outbound::Event(ClientEvent::StopAcknowledged { queues_cleared: true }))
                .await;
        }
        ClientCommand::Reset => {
            if *asr_listening {
                let _ = recognizer.stop().await;
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Status { status: AsrStatus::Stopped }))
                    .await;
            }
            recognizer.clear_partial();
            interrupt_current_utterance(session, outbound).await;

            tokio::time::sleep(Duration::from_millis(150)).await;

            *recognizer = (state.recognizer_factory)();
            if let Err(e) = recognizer.start(session_id, events_tx.clone()).await {
                warn!(%session_id, error = %e, "failed to restart ASR after reset");
                let _ = outbound
                    .send(Outbound::Event(ClientEvent::Error {
                        message: "failed to restart recognition".into(),
                    }))
                    .await;
                *asr_listening = false;
                return;
            }
            *asr_listening = true;
            let _ = outbound
                .send(Outbound::Event(ClientEvent::Status { status: AsrStatus::Listening }))
                .await;
        }
        ClientCommand::Interrupt => {
            interrupt_current_utterance(session, outbound).await;
            let _ = outbound.send(Outbound::Event(ClientEvent::InterruptAcknowledged)).await;
        }
    }
}

async fn interrupt_current_utterance(session: &Session, outbound: &mpsc::Sender<Outbound>) {
    let _ = outbound.send(Outbound::Event(ClientEvent::TtsStop)).await;
    session.request_interrupt().await;
    session.clear_interrupt().await;
}

async fn handle_transcript_event(
    event: TranscriptEvent,
    next_sequence: &mut u64,
    asr_tx: &mpsc::Sender<Utterance>,
    outbound: &mpsc::Sender<Outbound>,
) {
    if event.text.trim().is_empty() {
        return;
    }

    if event.is_final {
        let _ = outbound
            .send(Outbound::Event(ClientEvent::FinalTranscript { content: event.text.clone() }))
            .await;

        let sequence = *next_sequence;
        *next_sequence += 1;
        let _ = asr_tx
            .send(Utterance {
                session_id: event.session_id,
                sequence,
                text: event.text,
            })
            .await;
    } else {
        let _ = outbound
            .send(Outbound::Event(ClientEvent::PartialTranscript { content: event.text }))
            .await;
    }
}
