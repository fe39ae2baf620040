use tracing_subscriber::EnvFilter;
use voxd_api::{build_router, state::AppState};
use voxd_config::Config;
use voxd_pipeline::run_idle_reaper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = Config::load()?;
    let bind_addr = config.bind_addr.clone();
    let session_timeout_secs = config.session_timeout_secs;
    let session_reap_interval_secs = config.session_reap_interval_secs;

    let state = AppState::new(config);
    let sessions = state.sessions.clone();
    let close_signals = state.close_signals.clone();
    tokio::spawn(run_idle_reaper(
        sessions,
        std::time::Duration::from_secs(session_timeout_secs),
        std::time::Duration::from_secs(session_reap_interval_secs),
        move |session_id| {
            if let Some((_, tx)) = close_signals.remove(&session_id) {
                let _ = tx.send(());
            }
        },
    ));

    let router = build_router(state);

    tracing::info!(%bind_addr, "starting voxd voice conversation server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
