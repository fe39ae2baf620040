//! The single task allowed to write to a session's transport.
//!
//! Stage C's sentence task and the control-message stages all funnel through
//! one `mpsc` channel into here, so frames are never interleaved on the
//! wire. Audio chunks and the `tts_start`/`tts_end` frames bracketing them
//! are reordered by chunk number before they go out — chunk 0 is the
//! sentence's `tts_start`, chunks 1..N are audio, N+1 is `tts_end` — so a
//! producer racing ahead of another can never cause an out-of-order frame.
//! An interrupt or error pre-empts whatever is still buffered.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::messages::{AudioChunk, ClientEvent, Outbound, ServerMessage, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("transport send failed: {0}")]
    Send(String),
}

/// The write half of a client connection, abstracted away from any specific
/// web framework so the pipeline crate never needs to depend on one.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), WriterError>;
    async fn send_binary(&mut self, data: bytes::Bytes) -> Result<(), WriterError>;
}

enum QueuedFrame {
    Json(ClientEvent),
    Audio(bytes::Bytes),
}

/// Runs until `inbound` closes. Write errors are swallowed after the first
/// one — once a transport is broken there is nothing useful left to do, and
/// a session in that state is already on its way to cleanup.
pub async fn run_writer(session_id: SessionId, mut transport: impl Transport, mut inbound: mpsc::Receiver<Outbound>) {
    let mut heap: BinaryHeap<Reverse<(u32, u64, QueuedFrameHandle)>> = BinaryHeap::new();
    let mut frames: Vec<QueuedFrame> = Vec::new();
    let mut expected: u32 = 0;
    let mut last_chunk_number: u32 = 0;
    let mut seq: u64 = 0;
    let mut broken = false;

    while let Some(item) = inbound.recv().await {
        match item {
            Outbound::Event(ev @ (ClientEvent::TtsStop | ClientEvent::Error { .. })) => {
                // Interrupt or failure: drop whatever was still buffered for
                // the in-flight sentence and send immediately.
                heap.clear();
                frames.clear();
                expected = 0;
                last_chunk_number = 0;
                send_text_frame(session_id, &mut transport, &mut broken, &ev).await;
            }
            Outbound::Event(ev @ ClientEvent::TtsStart { .. }) => {
                heap.clear();
                frames.clear();
                expected = 0;
                last_chunk_number = 0;
                enqueue(&mut heap, &mut frames, &mut seq, 0, QueuedFrame::Json(ev));
            }
            Outbound::Event(ClientEvent::TtsEnd) => {
                enqueue(&mut heap, &mut frames, &mut seq, last_chunk_number + 1, QueuedFrame::Json(ClientEvent::TtsEnd));
            }
            Outbound::Audio(AudioChunk { chunk_number, pcm, .. }) => {
                last_chunk_number = last_chunk_number.max(chunk_number);
                enqueue(&mut heap, &mut frames, &mut seq, chunk_number, QueuedFrame::Audio(pcm));
            }
            // Every other control message (subtitle/llm_response/llm_status/status/
            // transcripts/ack messages) isn't part of any sentence's ordering
            // window, so it goes out immediately.
            Outbound::Event(ev) => {
                send_text_frame(session_id, &mut transport, &mut broken, &ev).await;
            }
        }

        drain_ready(session_id, &mut heap, &mut frames, &mut expected, &mut transport, &mut broken).await;
    }
}

/// `heap` holds ordering keys; the payload itself lives in the parallel
/// `frames` vec since `QueuedFrame` (carrying `bytes::Bytes`) doesn't need
/// to implement `Ord` for this to work.
type QueuedFrameHandle = usize;

fn enqueue(
    heap: &mut BinaryHeap<Reverse<(u32, u64, QueuedFrameHandle)>>,
    frames: &mut Vec<QueuedFrame>,
    seq: &mut u64,
    priority: u32,
    frame: QueuedFrame,
) {
    let handle = frames.len();
    frames.push(frame);
    heap.push(Reverse((priority, *seq, handle)));
    *seq += 1;
}

async fn drain_ready(
    session_id: SessionId,
    heap: &mut BinaryHeap<Reverse<(u32, u64, QueuedFrameHandle)>>,
    frames: &mut Vec<QueuedFrame>,
    expected: &mut u32,
    transport: &mut impl Transport,
    broken: &mut bool,
) {
    while let Some(&Reverse((priority, _, handle))) = heap.peek() {
        if priority != *expected {
            break;
        }
        heap.pop();
        match std::mem::replace(&mut frames[handle], QueuedFrame::Audio(bytes::Bytes::new())) {
            QueuedFrame::Json(event) => send_text_frame(session_id, transport, broken, &event).await,
            QueuedFrame::Audio(pcm) => send_binary_frame(transport, broken, pcm).await,
        }
        *expected += 1;
    }
}

async fn send_text_frame(session_id: SessionId, transport: &mut impl Transport, broken: &mut bool, event: &ClientEvent) {
    if *broken {
        return;
    }
    let message = ServerMessage { session_id, event: event.clone() };
    let text = match serde_json::to_string(&message) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound event");
            return;
        }
    };
    if let Err(e) = transport.send_text(text).await {
        warn!(error = %e, "writer transport send failed, dropping further frames");
        *broken = true;
    }
}

async fn send_binary_frame(transport: &mut impl Transport, broken: &mut bool, pcm: bytes::Bytes) {
    if *broken {
        return;
    }
    if let Err(e) = transport.send_binary(pcm).await {
        warn!(error = %e, "writer transport send failed, dropping further frames");
        *broken = true;
    }
}
