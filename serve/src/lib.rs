//! WebSocket coordinator for the tether agent debugger (axum + ws).
//!
//! Two listeners, one per peer: the instrumented agent connects to the
//! agent endpoint and reports events, breakpoints and commits; the operator
//! UI connects to the UI endpoint, receives the state stream and issues
//! halt/step/continue and run-management commands. One connection per peer;
//! everything funnels through a single controller lane.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listeners`], [`ServeOptions`].

mod app;
mod connection;
mod controller;

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use config::ServeConfig;
use tether::{NoopSummarizer, OpenAiSummarizer, RunLog, RunStore, Summarizer};

use app::AppState;
use controller::Controller;

/// Ping cadence on each channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
/// Silence longer than this counts as a dead peer. A halted run itself
/// never times out; only the socket is probed.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

/// Collaborators the coordinator is built from. Tests inject a noop
/// summarizer and a temp log directory here.
pub struct ServeOptions {
    pub summarizer: Arc<dyn Summarizer>,
    pub log_dir: PathBuf,
}

impl ServeOptions {
    /// Production wiring: OpenAI-backed summaries when a credential is
    /// present, otherwise none.
    pub fn from_config(cfg: &ServeConfig) -> Self {
        let summarizer: Arc<dyn Summarizer> =
            match OpenAiSummarizer::from_env(&cfg.summary_model) {
                Some(s) => Arc::new(s),
                None => {
                    tracing::warn!("OPENAI_API_KEY not set, breakpoint summaries disabled");
                    Arc::new(NoopSummarizer)
                }
            };
        Self {
            summarizer,
            log_dir: cfg.log_dir.clone(),
        }
    }
}

/// Runs the coordinator on existing listeners. Used by tests (bind both to
/// 127.0.0.1:0, then pass the listeners in).
pub async fn run_serve_on_listeners(
    agent_listener: TcpListener,
    ui_listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log = RunLog::new(&options.log_dir)?;
    let mut store = RunStore::default();
    store.load_history(&log)?;

    let (lane_tx, lane_rx) = mpsc::unbounded_channel();
    let controller = Controller::new(store, log, options.summarizer);
    let controller_handle = tokio::spawn(controller.run(lane_rx));

    let state = Arc::new(AppState::new(lane_tx));
    info!(
        "agent endpoint on ws://{}",
        agent_listener.local_addr()?
    );
    info!("UI endpoint on ws://{}", ui_listener.local_addr()?);

    let agent_srv = axum::serve(agent_listener, app::agent_router(state.clone())).into_future();
    let ui_srv = axum::serve(ui_listener, app::ui_router(state)).into_future();

    let result = tokio::select! {
        r = agent_srv => r,
        r = ui_srv => r,
    };
    controller_handle.abort();
    result?;
    Ok(())
}

/// Binds the agent and UI endpoints from config and serves forever.
pub async fn run_serve(
    cfg: &ServeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let agent_listener = TcpListener::bind(cfg.agent_addr()).await?;
    let ui_listener = TcpListener::bind(cfg.ui_addr()).await?;
    run_serve_on_listeners(agent_listener, ui_listener, ServeOptions::from_config(cfg)).await
}
