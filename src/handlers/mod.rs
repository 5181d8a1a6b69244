//! HTTP request handlers for the TrueIP API

use std::sync::Arc;

use crate::config::Config;
use crate::error::AppResult;
use crate::extractor::ClientIpExtractor;
use crate::metrics::{Metrics, MetricsRegistry, with_metrics_registry};

pub mod health;
pub mod ip;
pub mod metrics;

/// Application state shared across all handlers
///
/// Contains configuration, the extractor, and the metrics backend. All
/// fields are Arc'd (or internally Arc'd) for cheap cloning across Axum
/// handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    extractor: Arc<ClientIpExtractor>,
    metrics: Metrics,
}

impl AppState {
    /// Create a new AppState from configuration
    ///
    /// The state owns a fresh collector registry. The extractor's backend
    /// is installed through the option chain against that same registry, so
    /// it resolves to the very counters the scrape endpoint exposes -
    /// registration against an already-populated registry reuses them.
    ///
    /// # Errors
    ///
    /// Returns an error if counter registration fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(Arc::clone(&registry))?;

        let extractor = ClientIpExtractor::with_options(config.extraction.clone(), vec![
            with_metrics_registry(Some(registry)),
        ])?;

        Ok(Self {
            config,
            extractor: Arc::new(extractor),
            metrics,
        })
    }

    /// Get reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get reference to the client IP extractor
    pub fn extractor(&self) -> &ClientIpExtractor {
        &self.extractor
    }

    /// Get reference to the metrics backend
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let toml = r#"
[server]
host = "127.0.0.1"
port = 3000

[extraction]
trusted_proxies = ["203.0.113.1"]
"#;
    let config: Config = toml::from_str(toml).expect("should parse test config");
    config.validate().expect("test config should validate");
    AppState::new(Arc::new(config)).expect("should create AppState")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ExtractionSink, ExtractionSource};

    #[test]
    fn appstate_new_creates_state() {
        let state = test_state();
        assert_eq!(state.config().server.port, 3000);
    }

    #[test]
    fn appstate_is_clonable() {
        let state = test_state();
        let state2 = state.clone();
        assert_eq!(state2.config().server.port, 3000);
    }

    #[test]
    fn extractor_and_scrape_share_counters() {
        let state = test_state();

        // The extractor's sink was installed via the option chain against
        // the state's registry; its increments must be visible in the
        // state's exposition.
        let client = state.extractor().extract(
            &axum::http::HeaderMap::new(),
            "198.51.100.7".parse().expect("should parse"),
        );
        assert_eq!(client.source, ExtractionSource::RemoteAddr);

        let output = state.metrics().gather().expect("gather should succeed");
        assert!(output.contains("source=\"remote_addr\""));
    }

    #[test]
    fn state_metrics_and_extractor_metrics_are_one_series() {
        let state = test_state();

        state
            .metrics()
            .record_extraction_success(ExtractionSource::RemoteAddr);
        state.extractor().extract(
            &axum::http::HeaderMap::new(),
            "198.51.100.7".parse().expect("should parse"),
        );

        let output = state.metrics().gather().expect("gather should succeed");
        let line = output
            .lines()
            .find(|l| l.contains("source=\"remote_addr\"") && l.contains("result=\"success\""))
            .expect("series should exist");
        let value: f64 = line
            .split_whitespace()
            .last()
            .expect("should have value")
            .parse()
            .expect("should parse value");
        assert_eq!(value, 2.0);
    }
}
