//! Console logging for the `kindly` binary.
//!
//! Diagnostics go to stderr so stdout stays clean for command output
//! (`list`, `check -o`, `template`). `RUST_LOG` overrides the level chosen
//! from the verbose flag.

use std::io;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { "kindly=debug" } else { "kindly=warn" }
}

/// Installs the global subscriber. Calling it twice is a no-op.
pub fn init_logging(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
