//! End-to-end scenarios driven over a real WebSocket connection against a
//! real `voxd-api` router, with scripted vendor adapters standing in for
//! ASR/LLM/TTS. Named after the scenarios they cover in spec order (S1, S3,
//! S4, S6 — S2 lives in `barge_in_tests`, cross-session/superseding
//! invariants live in `pipeline_invariant_tests`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::support::{
    collect_until, connect, recv_until, send_json, ScriptedLlmClient, ScriptedRecognizer, ScriptedTtsSynthesizer,
    TestServer,
};

/// S1 — happy path: a final transcript produces two sentences, synthesized
/// one at a time, and a final `llm_response` carrying the full reply.
#[tokio::test]
async fn happy_path_yields_two_sentences_and_a_complete_reply() {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let llm = ScriptedLlmClient::new(["Hi there. How can I help?"], Duration::from_millis(5));
    let tts = ScriptedTtsSynthesizer::new(Duration::from_millis(5), 2);

    let server = TestServer::start(recognizer.clone(), Arc::new(llm), Arc::new(tts)).await;
    let mut ws = connect(&server.ws_url()).await;

    send_json(&mut ws, json!({"type": "start"})).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "listening", Duration::from_secs(2)).await;

    recognizer.emit("hello", false).await;
    recv_until(&mut ws, |v| v["type"] == "partial_transcript", Duration::from_secs(2)).await;

    recognizer.emit("hello.", true).await;
    recv_until(&mut ws, |v| v["type"] == "final_transcript" && v["content"] == "hello.", Duration::from_secs(2)).await;

    let events = collect_until(
        &mut ws,
        |v| v["type"] == "llm_response" && v["is_complete"] == true,
        Duration::from_secs(5),
    )
    .await;

    let tts_starts: Vec<_> = events.iter().filter(|v| v["type"] == "tts_start").collect();
    let tts_ends: Vec<_> = events.iter().filter(|v| v["type"] == "tts_end").collect();
    assert_eq!(tts_starts.len(), 2, "expected one tts_start per sentence, got {events:#?}");
    assert_eq!(tts_ends.len(), 2, "expected one tts_end per sentence, got {events:#?}");
    assert_eq!(tts_starts[0]["is_first"], true);
    assert_eq!(tts_starts[1]["is_first"], false);

    // Invariant 2: the second sentence's tts_start never arrives before the
    // first sentence's tts_end.
    let first_start = events.iter().position(|v| v["type"] == "tts_start").unwrap();
    let first_end = events.iter().position(|v| v["type"] == "tts_end").unwrap();
    let second_start = events.iter().rposition(|v| v["type"] == "tts_start").unwrap();
    assert!(first_end < second_start, "sentence 2 started before sentence 1 ended: {events:#?}");
    assert!(first_start < first_end);

    let final_response = events.last().expect("at least the terminal llm_response");
    assert_eq!(final_response["type"], "llm_response");
    assert_eq!(final_response["content"], "Hi there. How can I help?");
    assert_eq!(final_response["is_complete"], true);
    assert!(final_response.get("was_interrupted").is_none());
}

/// S3 — explicit interrupt mid-reply stops TTS, acknowledges the interrupt,
/// and the in-flight reply is reported as interrupted.
#[tokio::test]
async fn explicit_interrupt_stops_reply_and_is_acknowledged() {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let llm = ScriptedLlmClient::new(["This is a long reply. It keeps going. And going."], Duration::from_millis(60));
    let tts = ScriptedTtsSynthesizer::new(Duration::from_millis(60), 4);

    let server = TestServer::start(recognizer.clone(), Arc::new(llm), Arc::new(tts)).await;
    let mut ws = connect(&server.ws_url()).await;

    send_json(&mut ws, json!({"type": "start"})).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "listening", Duration::from_secs(2)).await;

    recognizer.emit("a long question.", true).await;
    recv_until(&mut ws, |v| v["type"] == "tts_start", Duration::from_secs(2)).await;

    send_json(&mut ws, json!({"type": "interrupt"})).await;
    recv_until(&mut ws, |v| v["type"] == "interrupt_acknowledged", Duration::from_secs(2)).await;
    recv_until(&mut ws, |v| v["type"] == "tts_stop", Duration::from_secs(2)).await;

    let interrupted = recv_until(
        &mut ws,
        |v| v["type"] == "llm_response" && v["was_interrupted"] == true,
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(interrupted["content"], "对话被中断");
    assert_eq!(interrupted["is_complete"], true);

    // Pipeline is back to listening: a fresh utterance starts a fresh reply.
    let llm2 = ScriptedLlmClient::new(["Okay."], Duration::from_millis(5));
    // The session's llm/tts adapters are fixed for the lifetime of the
    // connection in this harness, so instead assert the session still
    // accepts new utterances by checking a new final_transcript is echoed.
    let _ = llm2;
    recognizer.emit("another question.", true).await;
    recv_until(
        &mut ws,
        |v| v["type"] == "final_transcript" && v["content"] == "another question.",
        Duration::from_secs(2),
    )
    .await;
}

/// S4 — reset mid-session restarts ASR without dropping the session.
#[tokio::test]
async fn reset_restarts_asr_and_keeps_session_alive() {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let llm = ScriptedLlmClient::new(["Hi."], Duration::from_millis(5));
    let tts = ScriptedTtsSynthesizer::new(Duration::from_millis(5), 1);

    let server = TestServer::start(recognizer.clone(), Arc::new(llm), Arc::new(tts)).await;
    let mut ws = connect(&server.ws_url()).await;

    send_json(&mut ws, json!({"type": "start"})).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "listening", Duration::from_secs(2)).await;

    send_json(&mut ws, json!({"type": "reset"})).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "stopped", Duration::from_secs(2)).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "listening", Duration::from_secs(2)).await;

    // The session survives the reset and still has the same id on every
    // message envelope.
    recognizer.emit("still here.", true).await;
    let msg = recv_until(
        &mut ws,
        |v| v["type"] == "final_transcript" && v["content"] == "still here.",
        Duration::from_secs(2),
    )
    .await;
    assert!(msg.get("session_id").is_some());
}

/// S6 — a malformed client command produces an error, not a crash or a
/// silent drop, and the connection keeps working afterward.
#[tokio::test]
async fn malformed_command_emits_error_and_connection_survives() {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let llm = ScriptedLlmClient::new(["Hi."], Duration::from_millis(5));
    let tts = ScriptedTtsSynthesizer::new(Duration::from_millis(5), 1);

    let server = TestServer::start(recognizer.clone(), Arc::new(llm), Arc::new(tts)).await;
    let mut ws = connect(&server.ws_url()).await;

    use futures::SinkExt;
    ws.send(tokio_tungstenite::tungstenite::Message::text("{"))
        .await
        .expect("send malformed frame");

    recv_until(&mut ws, |v| v["type"] == "error", Duration::from_secs(2)).await;

    // Connection still works: a subsequent valid command is honored.
    send_json(&mut ws, json!({"type": "start"})).await;
    recv_until(&mut ws, |v| v["type"] == "status" && v["status"] == "listening", Duration::from_secs(2)).await;
}
