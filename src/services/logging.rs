//! Tracing bootstrap
//!
//! JSON output filtered by `RUST_LOG`, falling back to the given default
//! directives.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default directives when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "librarian_renamer=info";

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber was already installed, so callers
/// (and tests) may call this more than once.
pub fn init_tracing(default_filter: &str) -> Result<bool> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = default_filter, "Tracing initialized");
    }
    Ok(installed)
}
