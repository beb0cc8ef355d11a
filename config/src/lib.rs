//! Configuration for the tether coordinator.
//!
//! Two layers:
//!
//! 1. [`load_and_apply`]: merge project `.env` and XDG `config.toml` into
//!    the process environment with priority **existing env > .env > XDG**,
//!    so every knob (including `OPENAI_API_KEY`) has one sourcing rule.
//! 2. [`ServeConfig::from_env`]: the typed knobs the serving layer needs:
//!    host, the two listener ports, the summarizer model, the run log
//!    directory.

mod dotenv;
mod xdg_toml;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Applies config sources to the environment, only for keys not already
/// set. Precedence when a key is missing from the process environment:
///
/// 1. project `.env` (current directory, or `override_dir` if given)
/// 2. `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }
    Ok(())
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_AGENT_PORT: u16 = 8155;
pub const DEFAULT_UI_PORT: u16 = 8156;
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LOG_DIR: &str = "runs";

/// Typed configuration of the serving layer. The server version is not
/// here: it is compiled into the core crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServeConfig {
    pub host: String,
    pub agent_port: u16,
    pub ui_port: u16,
    pub summary_model: String,
    pub log_dir: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            agent_port: DEFAULT_AGENT_PORT,
            ui_port: DEFAULT_UI_PORT,
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

fn port_from_env(key: &str, default: u16) -> Result<u16, LoadError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| LoadError::Invalid {
            key: key.to_string(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

impl ServeConfig {
    /// Reads `TETHER_HOST`, `TETHER_AGENT_PORT`, `TETHER_UI_PORT`,
    /// `TETHER_SUMMARY_MODEL` and `TETHER_LOG_DIR`, defaulting each.
    pub fn from_env() -> Result<Self, LoadError> {
        Ok(Self {
            host: std::env::var("TETHER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            agent_port: port_from_env("TETHER_AGENT_PORT", DEFAULT_AGENT_PORT)?,
            ui_port: port_from_env("TETHER_UI_PORT", DEFAULT_UI_PORT)?,
            summary_model: std::env::var("TETHER_SUMMARY_MODEL")
                .unwrap_or_else(|_| DEFAULT_SUMMARY_MODEL.to_string()),
            log_dir: std::env::var("TETHER_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR)),
        })
    }

    pub fn agent_addr(&self) -> String {
        format!("{}:{}", self.host, self.agent_port)
    }

    pub fn ui_addr(&self) -> String {
        format!("{}:{}", self.host, self.ui_port)
    }
}
