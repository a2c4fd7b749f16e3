//! ChopShop Logging
//!
//! `tracing` subscriber setup shared by the daemon and the CLI.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,chopshop=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling this twice is a no-op.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}
