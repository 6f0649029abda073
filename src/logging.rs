//! Diagnostic tracing for the logging engine itself.
//!
//! The engine reports its own trouble (open failures, compression failures, retention warnings)
//! through `tracing`, never through its sinks. Diagnostics go to stderr using a compact
//! formatter and, when `RELAYLOG_DIAGNOSTICS_FILE` is set, are also appended to that file
//! through a non‑blocking writer.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stderr and optional file diagnostics.
///
/// - Respects `RUST_LOG` for filtering (defaults to `warn`).
/// - Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let installed = if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Build a non‑blocking writer for the diagnostics file, if one is configured.
fn configure_file_writer() -> Option<NonBlocking> {
    let path = std::env::var("RELAYLOG_DIAGNOSTICS_FILE").ok()?;
    if LOG_GUARD.get().is_some() {
        return None;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open diagnostics file {path}: {err}");
            None
        }
    }
}
