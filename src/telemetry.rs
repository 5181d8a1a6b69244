//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize the tracing subscriber for structured logging.
///
/// Can only run once per process; subsequent calls are silently ignored.
///
/// Filter resolution order: `RUST_LOG` if set, then the configured level
/// from `[observability]`, then plain `info` if the configured level does
/// not parse as a filter directive.
///
/// # Examples
///
/// ```no_run
/// trueip::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("trueip={default_level},tower_http=debug")))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
