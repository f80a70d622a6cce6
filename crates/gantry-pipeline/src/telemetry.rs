//! Tracing initialisation for Gantry binaries.
//!
//! [`init_tracing`] configures the global subscriber once per process;
//! later calls are ignored. `RUST_LOG` overrides the supplied default
//! level for fine-grained filtering.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// With `json` set, log lines are newline-delimited JSON for aggregation
/// pipelines; otherwise the human-readable formatter is used.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let layer = fmt::layer().with_target(false);
    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
