//! Tracing bootstrap for embedders and tests.
//!
//! Library code logs through `tracing` unconditionally; this module only
//! wires a default subscriber for processes that have none. The `LOG`
//! environment variable overrides the verbosity-derived filter.

use tracing_subscriber::EnvFilter;

/// Installs a compact stderr subscriber. Idempotent: if a global subscriber
/// is already set, this is a no-op.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}
