//! Structured logging setup for cadence.
//!
//! Library code logs through `tracing` macros with structured fields; this
//! module only installs the subscriber for the binary (or for tests that want
//! output).
//!
//! Log levels:
//! - ERROR: runner tasks that died without producing a result
//! - WARN: agent failures, timeouts, retries, aborts
//! - INFO: run and wave lifecycle
//! - DEBUG: dispatch, skips, per-agent transitions
//!
//! `RUST_LOG` takes precedence. Otherwise debug mode is enabled with the
//! `--debug` flag or `CADENCE_DEBUG=1`, and the default level is `info`.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Environment variable that turns on debug logging.
pub const DEBUG_ENV: &str = "CADENCE_DEBUG";

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging at the default level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "cadence=debug,warn"
    } else {
        "cadence=info,warn"
    }
}
