//! Prometheus metrics collection for TrueIP
//!
//! This module provides the counter backend for the client IP extraction
//! pipeline:
//! - Extraction attempts by source header and result
//! - Security events observed while walking forwarding chains
//!
//! Counters are registered against a shared [`MetricsRegistry`], either a
//! process-wide default or an explicit instance. Registration is idempotent:
//! constructing a second [`Metrics`] backend against the same registry reuses
//! the collectors already registered there, so both handles observe the same
//! counter values. A name collision with a collector of a different shape is
//! a hard error.
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extractor::ExtractorOption;

/// Counter family for extraction attempts, labeled `{source, result}`.
///
/// The name and label keys are a scrape-compatibility surface; dashboards
/// and alerts key on them verbatim.
const EXTRACTION_TOTAL: &str = "extraction_total";

/// Counter family for security events, labeled `{event}`.
const SECURITY_EVENTS_TOTAL: &str = "security_events_total";

const EXTRACTION_LABELS: [&str; 2] = ["source", "result"];
const SECURITY_EVENT_LABELS: [&str; 1] = ["event"];

const RESULT_SUCCESS: &str = "success";
const RESULT_INVALID: &str = "invalid";

/// Errors surfaced by counter registration and exposition.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The metric name is taken by a collector with a different kind or
    /// label schema. Not retried; the registry state is left untouched.
    #[error("metric {metric}: incompatible collector type already registered")]
    IncompatibleCollector { metric: String },

    /// The registry rejected registration for any other reason.
    #[error("failed to register metric {metric}")]
    Registration {
        metric: String,
        #[source]
        source: prometheus::Error,
    },

    /// Prometheus text exposition failed.
    #[error("failed to encode metrics")]
    Encode(#[source] prometheus::Error),
}

impl MetricsError {
    /// Name of the metric a registration error refers to, if any.
    ///
    /// Lets callers distinguish which of the two counters (by registration
    /// order: `extraction_total` first, `security_events_total` second)
    /// failed.
    pub fn metric(&self) -> Option<&str> {
        match self {
            Self::IncompatibleCollector { metric } | Self::Registration { metric, .. } => {
                Some(metric)
            }
            Self::Encode(_) => None,
        }
    }
}

/// Source a client IP was extracted from, used as the `source` label value.
///
/// Restricting the label to these four values keeps the `extraction_total`
/// cardinality bounded at 4 sources x 2 results = 8 time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// RFC 7239 `Forwarded` header
    Forwarded,
    /// De-facto `X-Forwarded-For` header
    XForwardedFor,
    /// Single-value `X-Real-Ip` header
    XRealIp,
    /// Transport-level peer address (always available, never invalid)
    RemoteAddr,
}

impl ExtractionSource {
    /// Convert source to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::XForwardedFor => "x_forwarded_for",
            Self::XRealIp => "x_real_ip",
            Self::RemoteAddr => "remote_addr",
        }
    }

    /// HTTP header this source reads, or `None` for the transport address.
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            Self::Forwarded => Some("forwarded"),
            Self::XForwardedFor => Some("x-forwarded-for"),
            Self::XRealIp => Some("x-real-ip"),
            Self::RemoteAddr => None,
        }
    }
}

/// Capability interface the extraction pipeline records through.
///
/// Implemented by [`Metrics`] and by [`NoopSink`] (the default when no
/// metrics option was applied at construction). All operations are
/// synchronous, infallible, and safe to call from any number of threads.
pub trait ExtractionSink: Send + Sync {
    /// A source yielded a valid client IP.
    fn record_extraction_success(&self, source: ExtractionSource);

    /// A source was present but did not yield a valid client IP.
    fn record_extraction_failure(&self, source: ExtractionSource);

    /// An anomaly was classified while inspecting forwarding headers.
    ///
    /// `event` is free-form; every distinct value becomes its own counter
    /// series. Cardinality is bounded only by caller discipline.
    fn record_security_event(&self, event: &str);
}

/// Sink that discards all recordings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ExtractionSink for NoopSink {
    fn record_extraction_success(&self, _source: ExtractionSource) {}
    fn record_extraction_failure(&self, _source: ExtractionSource) {}
    fn record_security_event(&self, _event: &str) {}
}

/// A collector slot in a [`MetricsRegistry`].
///
/// Only counters registered through the typed path keep a reusable handle.
/// Foreign collectors (registered via [`MetricsRegistry::register`]) are
/// recorded by name and label schema for collision detection, but the
/// `prometheus` `Collector` trait offers no typed downcast, so they can
/// never be handed back out.
enum RegisteredCollector {
    Counter {
        label_names: Vec<String>,
        counter: IntCounterVec,
    },
    Foreign,
}

/// Shared collector registry wrapping a [`prometheus::Registry`].
///
/// Collector names are unique within one instance. Re-registering a name
/// through the typed counter path either reuses the existing structurally
/// compatible collector or fails with
/// [`MetricsError::IncompatibleCollector`].
pub struct MetricsRegistry {
    inner: Registry,
    collectors: Mutex<HashMap<String, RegisteredCollector>>,
}

static DEFAULT_REGISTRY: LazyLock<Arc<MetricsRegistry>> =
    LazyLock::new(|| Arc::new(MetricsRegistry::new()));

/// Process-wide default registry.
///
/// Used when a backend is constructed without an explicit registry. Prefer
/// explicit instances in services that own their scrape endpoint; the
/// default exists for embedders that share one exposition across components.
pub fn default_registry() -> Arc<MetricsRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
            collectors: Mutex::new(HashMap::new()),
        }
    }

    /// Register a foreign collector.
    ///
    /// The collector's descriptors are recorded so that later typed
    /// registrations under the same name fail closed instead of silently
    /// shadowing it.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Registration`] if the underlying registry
    /// rejects the collector (including duplicate names).
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<(), MetricsError> {
        let names: Vec<String> = collector.desc().iter().map(|d| d.fq_name.clone()).collect();
        let metric = names
            .first()
            .map_or_else(|| "<unnamed>".to_string(), Clone::clone);

        let mut collectors = self.lock_collectors();
        self.inner
            .register(collector)
            .map_err(|source| MetricsError::Registration { metric, source })?;
        for name in names {
            collectors.insert(name, RegisteredCollector::Foreign);
        }
        Ok(())
    }

    /// Register or reuse an `IntCounterVec` under `name`.
    ///
    /// Reuse requires the existing collector to be a counter created through
    /// this path with an identical label schema; anything else is an
    /// incompatible collector.
    fn counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<IntCounterVec, MetricsError> {
        let mut collectors = self.lock_collectors();

        if let Some(existing) = collectors.get(name) {
            return match existing {
                RegisteredCollector::Counter {
                    label_names: existing_labels,
                    counter,
                } if existing_labels.iter().map(String::as_str).eq(label_names.iter().copied()) => {
                    Ok(counter.clone())
                }
                _ => Err(MetricsError::IncompatibleCollector {
                    metric: name.to_string(),
                }),
            };
        }

        let counter = IntCounterVec::new(Opts::new(name, help), label_names).map_err(|source| {
            MetricsError::Registration {
                metric: name.to_string(),
                source,
            }
        })?;
        self.inner
            .register(Box::new(counter.clone()))
            .map_err(|source| match source {
                // The collector table and the inner registry are mutated
                // together under the same lock, so a name unknown to the
                // table cannot already be registered; fail closed anyway.
                prometheus::Error::AlreadyReg => MetricsError::IncompatibleCollector {
                    metric: name.to_string(),
                },
                source => MetricsError::Registration {
                    metric: name.to_string(),
                    source,
                },
            })?;
        collectors.insert(
            name.to_string(),
            RegisteredCollector::Counter {
                label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
                counter: counter.clone(),
            },
        );
        Ok(counter)
    }

    /// Gather all metric families from the backing registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.inner.gather()
    }

    fn lock_collectors(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, RegisteredCollector>> {
        // A panic while holding the lock leaves the table consistent with the
        // inner registry, so recovering from poisoning is sound.
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("collectors", &self.lock_collectors().len())
            .finish_non_exhaustive()
    }
}

/// Counter backend for the extraction pipeline.
///
/// Holds both counter families for the lifetime of the host component and
/// increments them on every recording call; there is no buffering. Cloning
/// is cheap and clones share the underlying counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<MetricsRegistry>,
    extraction_total: IntCounterVec,
    security_events: IntCounterVec,
}

impl Metrics {
    /// Register the two counter families against `registry` and return a
    /// backend holding the resolved collectors.
    ///
    /// Registration order is fixed: `extraction_total` first, then
    /// `security_events_total`; errors name the metric that failed.
    ///
    /// # Errors
    ///
    /// [`MetricsError::IncompatibleCollector`] if a name is taken by a
    /// collector of a different shape, [`MetricsError::Registration`] for
    /// any other registry rejection.
    pub fn register(registry: Arc<MetricsRegistry>) -> Result<Self, MetricsError> {
        let extraction_total = registry.counter_vec(
            EXTRACTION_TOTAL,
            "Total number of client IP extraction attempts by source header and result",
            &EXTRACTION_LABELS,
        )?;
        let security_events = registry.counter_vec(
            SECURITY_EVENTS_TOTAL,
            "Total number of security events observed while extracting client IPs",
            &SECURITY_EVENT_LABELS,
        )?;

        Ok(Self {
            registry,
            extraction_total,
            security_events,
        })
    }

    /// Register against the process-wide default registry.
    ///
    /// # Errors
    ///
    /// Same as [`Metrics::register`].
    pub fn register_default() -> Result<Self, MetricsError> {
        Self::register(default_registry())
    }

    /// The registry this backend was registered against.
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Total security events recorded across all event labels.
    ///
    /// Used by the `/health` endpoint. Sums all label combinations.
    pub fn security_events_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == SECURITY_EVENTS_TOTAL)
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Encode`] if text encoding fails.
    pub fn gather(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(MetricsError::Encode)?;

        String::from_utf8(buffer).map_err(|e| {
            MetricsError::Encode(prometheus::Error::Msg(format!(
                "metrics output is not valid UTF-8 at byte {}",
                e.utf8_error().valid_up_to()
            )))
        })
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ExtractionSink for Metrics {
    fn record_extraction_success(&self, source: ExtractionSource) {
        self.extraction_total
            .with_label_values(&[source.as_str(), RESULT_SUCCESS])
            .inc();
    }

    fn record_extraction_failure(&self, source: ExtractionSource) {
        self.extraction_total
            .with_label_values(&[source.as_str(), RESULT_INVALID])
            .inc();
    }

    fn record_security_event(&self, event: &str) {
        self.security_events.with_label_values(&[event]).inc();
    }
}

/// Option installing a backend over the process-wide default registry.
pub fn with_metrics() -> ExtractorOption {
    with_metrics_registry(None)
}

/// Option installing a backend over `registry`.
///
/// `None` resolves to the process-wide default, so an unset registry handle
/// threaded through calling code behaves the same as not passing one at all.
/// Backend construction runs when the option is applied; a registration
/// failure aborts the whole option chain.
pub fn with_metrics_registry(registry: Option<Arc<MetricsRegistry>>) -> ExtractorOption {
    ExtractorOption::new(move |builder| {
        let metrics = match registry {
            Some(registry) => Metrics::register(registry)?,
            None => Metrics::register_default()?,
        };
        builder.set_sink(Arc::new(metrics));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntGauge;

    /// Extract the value of the first sample line containing all needles.
    fn counter_value(output: &str, needles: &[&str]) -> f64 {
        output
            .lines()
            .find(|line| !line.starts_with('#') && needles.iter().all(|n| line.contains(n)))
            .and_then(|line| line.split_whitespace().last())
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| panic!("no sample line matching {:?}:\n{}", needles, output))
    }

    #[test]
    fn register_creates_both_counter_families() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");

        metrics.record_extraction_success(ExtractionSource::Forwarded);
        metrics.record_security_event("invalid_ip");

        let output = metrics.gather().expect("gather should succeed");
        assert!(output.contains("# TYPE extraction_total counter"));
        assert!(output.contains("# TYPE security_events_total counter"));
        assert!(output.contains("source=\"forwarded\""));
        assert!(output.contains("result=\"success\""));
        assert!(output.contains("event=\"invalid_ip\""));
    }

    #[test]
    fn counter_names_carry_no_prefix() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");
        metrics.record_extraction_success(ExtractionSource::RemoteAddr);

        let output = metrics.gather().expect("gather should succeed");
        // The family names are a drop-in scrape contract.
        assert!(output.lines().any(|l| l.starts_with("extraction_total{")));
    }

    #[test]
    fn repeated_registration_reuses_counters() {
        let registry = Arc::new(MetricsRegistry::new());
        let first = Metrics::register(Arc::clone(&registry)).expect("first registration");
        let second = Metrics::register(registry).expect("second registration");

        first.record_extraction_success(ExtractionSource::XRealIp);
        second.record_extraction_success(ExtractionSource::XRealIp);
        second.record_extraction_success(ExtractionSource::XRealIp);

        // Increments through either handle land on the same series.
        let output = first.gather().expect("gather should succeed");
        let value = counter_value(&output, &["source=\"x_real_ip\"", "result=\"success\""]);
        assert_eq!(value, 3.0);

        let other = second.gather().expect("gather should succeed");
        assert_eq!(output, other);
    }

    #[test]
    fn incompatible_collector_is_rejected() {
        let registry = Arc::new(MetricsRegistry::new());
        let gauge = IntGauge::new(EXTRACTION_TOTAL, "squatting the counter name")
            .expect("gauge creation should succeed");
        registry
            .register(Box::new(gauge))
            .expect("foreign registration should succeed");

        let err = Metrics::register(registry).expect_err("registration should fail");
        assert!(err.to_string().contains("incompatible collector type"));
        assert_eq!(err.metric(), Some(EXTRACTION_TOTAL));
    }

    #[test]
    fn collision_on_second_metric_names_it() {
        let registry = Arc::new(MetricsRegistry::new());
        let gauge = IntGauge::new(SECURITY_EVENTS_TOTAL, "squatting the counter name")
            .expect("gauge creation should succeed");
        registry
            .register(Box::new(gauge))
            .expect("foreign registration should succeed");

        let err = Metrics::register(registry).expect_err("registration should fail");
        assert!(err.to_string().contains("incompatible collector type"));
        assert_eq!(err.metric(), Some(SECURITY_EVENTS_TOTAL));
    }

    #[test]
    fn mismatched_label_schema_is_incompatible() {
        let registry = MetricsRegistry::new();
        registry
            .counter_vec(EXTRACTION_TOTAL, "help", &["other", "labels"])
            .expect("first registration should succeed");

        let err = registry
            .counter_vec(EXTRACTION_TOTAL, "help", &EXTRACTION_LABELS)
            .expect_err("schema mismatch should fail");
        assert!(matches!(err, MetricsError::IncompatibleCollector { .. }));
    }

    #[test]
    fn duplicate_foreign_registration_fails() {
        let registry = MetricsRegistry::new();
        let first = IntGauge::new("squatter", "help").expect("gauge creation should succeed");
        let second = IntGauge::new("squatter", "help").expect("gauge creation should succeed");

        registry
            .register(Box::new(first))
            .expect("first registration should succeed");
        let err = registry
            .register(Box::new(second))
            .expect_err("duplicate registration should fail");
        assert!(matches!(err, MetricsError::Registration { .. }));
        assert_eq!(err.metric(), Some("squatter"));
    }

    #[test]
    fn label_combinations_are_independent() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");

        metrics.record_extraction_failure(ExtractionSource::RemoteAddr);
        metrics.record_extraction_failure(ExtractionSource::RemoteAddr);
        metrics.record_extraction_success(ExtractionSource::RemoteAddr);

        let output = metrics.gather().expect("gather should succeed");
        let success = counter_value(&output, &["source=\"remote_addr\"", "result=\"success\""]);
        let invalid = counter_value(&output, &["source=\"remote_addr\"", "result=\"invalid\""]);
        assert_eq!(success, 1.0);
        assert_eq!(invalid, 2.0);
    }

    #[test]
    fn security_events_are_per_event_series() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");

        metrics.record_security_event("invalid_ip");
        metrics.record_security_event("invalid_ip");
        metrics.record_security_event("chain_too_long");

        let output = metrics.gather().expect("gather should succeed");
        assert_eq!(counter_value(&output, &["event=\"invalid_ip\""]), 2.0);
        assert_eq!(counter_value(&output, &["event=\"chain_too_long\""]), 1.0);
        assert_eq!(metrics.security_events_count(), 3);
    }

    #[test]
    fn free_form_event_labels_are_accepted() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");

        // Any string becomes its own series; no validation by contract.
        metrics.record_security_event("");
        metrics.record_security_event("completely custom event");

        assert_eq!(metrics.security_events_count(), 2);
    }

    #[test]
    fn default_registry_is_shared() {
        let a = default_registry();
        let b = default_registry();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn source_label_values() {
        assert_eq!(ExtractionSource::Forwarded.as_str(), "forwarded");
        assert_eq!(ExtractionSource::XForwardedFor.as_str(), "x_forwarded_for");
        assert_eq!(ExtractionSource::XRealIp.as_str(), "x_real_ip");
        assert_eq!(ExtractionSource::RemoteAddr.as_str(), "remote_addr");
    }

    #[test]
    fn source_header_names() {
        assert_eq!(
            ExtractionSource::XForwardedFor.header_name(),
            Some("x-forwarded-for")
        );
        assert_eq!(ExtractionSource::RemoteAddr.header_name(), None);
    }

    #[test]
    fn metrics_is_clonable() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Metrics::register(registry).expect("registration should succeed");
        let cloned = metrics.clone();

        metrics.record_extraction_success(ExtractionSource::Forwarded);

        // Clones share the registry and counters.
        let output = cloned.gather().expect("gather should succeed");
        assert!(output.contains("extraction_total"));
    }

    #[test]
    fn concurrent_recording_loses_no_updates() {
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let metrics = Arc::new(Metrics::register(registry).expect("registration should succeed"));

        const THREADS: usize = 8;
        const INCREMENTS: usize = 1_000;

        let mut handles = vec![];
        for _ in 0..THREADS {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    m.record_extraction_success(ExtractionSource::Forwarded);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        let output = metrics.gather().expect("gather should succeed");
        let value = counter_value(&output, &["source=\"forwarded\"", "result=\"success\""]);
        assert_eq!(value, (THREADS * INCREMENTS) as f64);
    }

    #[test]
    fn concurrent_registration_converges() {
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let metrics = Metrics::register(registry).expect("registration should succeed");
                metrics.record_extraction_success(ExtractionSource::XForwardedFor);
            }));
        }
        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        let metrics = Metrics::register(registry).expect("registration should succeed");
        let output = metrics.gather().expect("gather should succeed");
        let value = counter_value(&output, &["source=\"x_forwarded_for\"", "result=\"success\""]);
        assert_eq!(value, 8.0);
    }
}
