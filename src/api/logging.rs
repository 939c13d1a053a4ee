use crate::util::parse_bool_flag;
use anyhow::{anyhow, Result};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_PATH: &str = "/tmp/sentinel-debug.log";
const DEFAULT_LOG_FILTER: &str = "sentinel=info";
const LOG_FILTER_ENV: &str = "SENTINEL_LOG";
const LOG_PATH_ENV: &str = "SENTINEL_LOG_PATH";
const DEBUG_FRAMES_ENV: &str = "SENTINEL_DEBUG_FRAMES";

/// Installs the global fmt subscriber. Output goes to the log file when one
/// resolves, otherwise to stderr.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match resolve_log_path() {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

pub fn debug_frames_enabled() -> bool {
    std::env::var(DEBUG_FRAMES_ENV)
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
}

pub fn emit_frame_debug(frame: &str) {
    tracing::info!(target: "sentinel::frames", frame, "raw frame");
}

pub fn emit_payload_fallback(kind: &str, data: &str, parse_error: &serde_json::Error) {
    tracing::debug!(
        kind,
        data,
        error = %parse_error,
        "frame payload is not JSON, keeping raw string"
    );
}

fn resolve_log_path() -> Option<String> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            if std::io::stderr().is_terminal() {
                Some(DEFAULT_LOG_PATH.to_string())
            } else {
                None
            }
        })
}
