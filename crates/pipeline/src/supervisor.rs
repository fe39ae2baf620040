//! Idle-session reaper.
//!
//! Runs for the lifetime of the server, periodically sweeping the session
//! registry for connections that stopped sending audio or commands without
//! ever closing the socket, and tearing down their pipeline state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::session::SessionRegistry;

/// Runs the reap loop until `shutdown` fires. `on_reap` is called with each
/// stale session's id so the caller can close its actual transport —
/// the registry itself has no notion of a live socket.
pub async fn run_idle_reaper<F>(
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    reap_interval: Duration,
    mut on_reap: F,
) where
    F: FnMut(crate::messages::SessionId),
{
    let mut ticker = tokio::time::interval(reap_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let stale = registry.inactive_sessions(idle_timeout).await;
        if stale.is_empty() {
            continue;
        }
        for session in stale {
            info!(session_id = %session.id, "reaping idle session");
            registry.remove(&session.id);
            on_reap(session.id);
        }
    }
}
