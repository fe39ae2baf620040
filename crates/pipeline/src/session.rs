//! Per-connection session state and the registry that owns it.
//!
//! Replaces a single global, unsynchronized session map with a `DashMap`
//! keyed by [`SessionId`], following the same shared-registry-with-self-
//! cleaning-entries shape the engine uses for its worker table.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::messages::SessionId;

/// How long an aborted task's own cancellation-aware select! arm gets to
/// finish cooperatively before [`abort_with_grace`] hard-kills it.
const INTERRUPT_ABORT_GRACE: Duration = Duration::from_millis(50);

/// Aborts `task` if it hasn't already finished within [`INTERRUPT_ABORT_GRACE`].
/// Spawned detached so the caller requesting the interrupt never waits on it.
fn abort_with_grace(mut task: tokio::task::JoinHandle<()>) {
    tokio::spawn(async move {
        tokio::select! {
            _ = &mut task => {}
            _ = tokio::time::sleep(INTERRUPT_ABORT_GRACE) => {
                task.abort();
            }
        }
    });
}

/// All state kept for one live connection.
///
/// Task handles are tracked so an interrupt or disconnect can tear down
/// in-flight work; `interrupt` is a [`CancellationToken`] rather than a
/// polled boolean flag so every stage observes it as soon as it fires
/// instead of on its next queue-poll.
pub struct Session {
    pub id: SessionId,
    interrupt: Mutex<CancellationToken>,
    is_processing_llm: AtomicBool,
    is_tts_active: AtomicBool,
    current_sequence: AtomicU64,
    last_activity: Mutex<Instant>,
    current_llm_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    current_tts_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            interrupt: Mutex::new(CancellationToken::new()),
            is_processing_llm: AtomicBool::new(false),
            is_tts_active: AtomicBool::new(false),
            current_sequence: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            current_llm_task: Mutex::new(None),
            current_tts_task: Mutex::new(None),
        }
    }

    pub fn set_processing_llm(&self, value: bool) {
        self.is_processing_llm.store(value, Ordering::SeqCst);
    }

    pub fn is_processing_llm(&self) -> bool {
        self.is_processing_llm.load(Ordering::SeqCst)
    }

    pub fn set_tts_active(&self, value: bool) {
        self.is_tts_active.store(value, Ordering::SeqCst);
    }

    pub fn is_tts_active(&self) -> bool {
        self.is_tts_active.load(Ordering::SeqCst)
    }

    pub async fn set_llm_task(&self, handle: tokio::task::JoinHandle<()>) {
        if let Some(previous) = self.current_llm_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn set_tts_task(&self, handle: tokio::task::JoinHandle<()>) {
        if let Some(previous) = self.current_tts_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Marks `seq` as the utterance currently owning the pipeline. Stage C
    /// uses this to drop sentences left over from an utterance that was
    /// superseded before they reached synthesis.
    pub fn set_current_sequence(&self, seq: u64) {
        self.current_sequence.store(seq, Ordering::SeqCst);
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, seq: u64) -> bool {
        seq == self.current_sequence()
    }

    pub async fn update_activity(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    pub async fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.lock().await.elapsed() > timeout
    }

    /// Returns the token stages should watch for this session's current
    /// interrupt cycle.
    pub async fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.lock().await.clone()
    }

    /// Requests an interrupt: cancels the token every stage watches and
    /// aborts whichever LLM/TTS tasks are currently running. Queues are not
    /// drained here — callers own their own queue and drop/recreate it as
    /// needed, since the registry has no access to per-stage channel ends.
    ///
    /// Also invalidates whatever utterance currently owns the pipeline, by
    /// pushing `current_sequence` past any sequence number a real utterance
    /// could carry. A barge-in or explicit `interrupt` has no new utterance
    /// to advance to the way a fresh final transcript does, but any sentence
    /// of the interrupted utterance still sitting in Stage C's queue must
    /// fail `is_current` and be dropped rather than reaching synthesis under
    /// the freshly-cleared token. When this interrupt is itself caused by a
    /// new utterance, [`Self::set_current_sequence`] overwrites this right
    /// after with the new utterance's real sequence.
    pub async fn request_interrupt(&self) {
        info!(session_id = %self.id, "interrupt requested");
        self.interrupt.lock().await.cancel();
        self.current_sequence.store(u64::MAX, Ordering::SeqCst);
        // The cancelled task's own select! arm gets a grace window to finish
        // cooperatively (e.g. to emit its "interrupted" reply) before the
        // hard abort backstop fires; this runs detached so callers — Stage
        // A dispatches one on every utterance — never block on it.
        if let Some(task) = self.current_llm_task.lock().await.take() {
            abort_with_grace(task);
        }
        if let Some(task) = self.current_tts_task.lock().await.take() {
            abort_with_grace(task);
        }
        self.set_processing_llm(false);
        self.set_tts_active(false);
    }

    /// Clears the interrupt for the next utterance cycle. A fresh
    /// `CancellationToken` replaces the old one because a fired token can
    /// never be un-cancelled.
    pub async fn clear_interrupt(&self) {
        *self.interrupt.lock().await = CancellationToken::new();
    }
}

/// Registry of live sessions, replacing the Python implementation's module-
/// level global dict with a shared, lock-free map any connection handler or
/// the idle-session reaper can reach concurrently.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::new()));
        self.sessions.insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            info!(session_id = %id, "session removed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns every session that has been inactive longer than `timeout`.
    pub async fn inactive_sessions(&self, timeout: Duration) -> Vec<Arc<Session>> {
        let mut stale = Vec::new();
        for entry in self.sessions.iter() {
            if entry.value().is_inactive(timeout).await {
                stale.push(entry.value().clone());
            }
        }
        stale
    }
}
