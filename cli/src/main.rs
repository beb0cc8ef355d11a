//! Tether binary: parse config, start the coordinator.
//!
//! Flags mirror the `TETHER_*` environment knobs; `.env` and
//! `~/.config/tether/config.toml` are applied first with existing env
//! winning.

use clap::Parser;
use config::ServeConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether: interactive debugger coordinator for LLM agents")]
struct Args {
    /// Host both endpoints bind to
    #[arg(long, env = "TETHER_HOST", default_value = config::DEFAULT_HOST)]
    host: String,

    /// Port for the agent connection
    #[arg(long, env = "TETHER_AGENT_PORT", default_value_t = config::DEFAULT_AGENT_PORT)]
    agent_port: u16,

    /// Port for the UI connection
    #[arg(long, env = "TETHER_UI_PORT", default_value_t = config::DEFAULT_UI_PORT)]
    ui_port: u16,

    /// Model used for breakpoint summaries (needs OPENAI_API_KEY)
    #[arg(long, env = "TETHER_SUMMARY_MODEL", default_value = config::DEFAULT_SUMMARY_MODEL)]
    summary_model: String,

    /// Directory closed runs are persisted to
    #[arg(long, env = "TETHER_LOG_DIR", default_value = config::DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = config::load_and_apply("tether", None) {
        tracing::warn!(error = %e, "config load failed, continuing with process env");
    }
    let args = Args::parse();

    let cfg = ServeConfig {
        host: args.host,
        agent_port: args.agent_port,
        ui_port: args.ui_port,
        summary_model: args.summary_model,
        log_dir: args.log_dir,
    };
    serve::run_serve(&cfg).await
}
