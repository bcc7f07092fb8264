//! Tracing subscriber setup for the `bia` binary.
//!
//! Filter precedence: `RUST_LOG`, then `LOG_LEVEL` (e.g. `debug`), then
//! `info`. Logs go to stderr so `bia ask --json` output stays clean.

use tracing_subscriber::EnvFilter;

/// Resolve the filter directive from the environment.
pub fn filter_directive() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL").map(|l| l.to_lowercase()))
        .unwrap_or_else(|_| "info".to_string())
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_new(filter_directive()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
