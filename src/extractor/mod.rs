//! Client IP extraction from forwarding headers
//!
//! The extractor walks configured header sources in priority order and falls
//! back to the transport address. Forwarding chains are evaluated
//! rightmost-untrusted: entries appended by our own trusted proxies are
//! skipped and the first address a trusted proxy saw is taken as the client.
//!
//! Construction uses an ordered option chain: each [`ExtractorOption`]
//! mutates the builder, later options override earlier ones for the same
//! field, and the first failing option aborts construction.

mod forwarded;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Serialize;

use crate::config::ExtractionConfig;
use crate::error::AppResult;
use crate::metrics::{ExtractionSink, ExtractionSource, NoopSink};

/// A forwarding entry did not parse as an IP address.
pub const EVENT_INVALID_IP: &str = "invalid_ip";
/// A forwarding chain exceeded the configured length limit.
pub const EVENT_CHAIN_TOO_LONG: &str = "chain_too_long";
/// A source header appeared more than once in the same request.
pub const EVENT_MULTIPLE_HEADERS: &str = "multiple_headers";

/// Outcome of client IP extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientIp {
    /// The resolved client address.
    pub ip: IpAddr,
    /// Which source produced it.
    pub source: ExtractionSource,
}

/// A configuration mutation applied during extractor construction.
///
/// Options are pure with respect to ordering: applying the same chain twice
/// from the same starting builder is deterministic. They do not retain the
/// builder.
pub struct ExtractorOption {
    apply: Box<dyn FnOnce(&mut ExtractorBuilder) -> AppResult<()> + Send>,
}

impl ExtractorOption {
    /// Wrap a mutation closure as an option.
    pub fn new(
        apply: impl FnOnce(&mut ExtractorBuilder) -> AppResult<()> + Send + 'static,
    ) -> Self {
        Self {
            apply: Box::new(apply),
        }
    }

    fn apply(self, builder: &mut ExtractorBuilder) -> AppResult<()> {
        (self.apply)(builder)
    }
}

impl fmt::Debug for ExtractorOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorOption").finish_non_exhaustive()
    }
}

/// Option installing an already-built recording sink.
///
/// This is the escape hatch for embedders with their own metrics backend;
/// the usual entry points are [`crate::metrics::with_metrics`] and
/// [`crate::metrics::with_metrics_registry`].
pub fn with_sink(sink: Arc<dyn ExtractionSink>) -> ExtractorOption {
    ExtractorOption::new(move |builder| {
        builder.set_sink(sink);
        Ok(())
    })
}

/// Mutable configuration state during extractor construction.
pub struct ExtractorBuilder {
    config: ExtractionConfig,
    sink: Arc<dyn ExtractionSink>,
}

impl ExtractorBuilder {
    /// Start from a validated extraction config with no recording sink.
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            sink: Arc::new(NoopSink),
        }
    }

    /// Install `sink` as the live recording backend.
    ///
    /// When several options install a sink, the last option applied wins,
    /// regardless of which factory produced it.
    pub fn set_sink(&mut self, sink: Arc<dyn ExtractionSink>) {
        self.sink = sink;
    }

    /// Apply `options` strictly left to right.
    ///
    /// The first failing option aborts the chain: no later option runs and
    /// the builder is consumed, so partially-applied state is unusable.
    ///
    /// # Errors
    ///
    /// Returns the first option's error unchanged.
    pub fn apply(mut self, options: impl IntoIterator<Item = ExtractorOption>) -> AppResult<Self> {
        for option in options {
            option.apply(&mut self)?;
        }
        Ok(self)
    }

    /// Finish construction.
    pub fn build(self) -> ClientIpExtractor {
        ClientIpExtractor {
            config: self.config,
            sink: self.sink,
        }
    }
}

impl fmt::Debug for ExtractorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolves the real client IP of a request.
///
/// `Send + Sync` and lock-free at extraction time; all shared state lives
/// in the recording sink, which is atomic by contract.
pub struct ClientIpExtractor {
    config: ExtractionConfig,
    sink: Arc<dyn ExtractionSink>,
}

impl ClientIpExtractor {
    /// Extractor without metrics, from a validated config.
    pub fn new(config: ExtractionConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start a builder for option-based construction.
    pub fn builder(config: ExtractionConfig) -> ExtractorBuilder {
        ExtractorBuilder::new(config)
    }

    /// Construct with an option chain.
    ///
    /// # Errors
    ///
    /// Returns the first failing option's error; no extractor exists in
    /// that case.
    pub fn with_options(
        config: ExtractionConfig,
        options: Vec<ExtractorOption>,
    ) -> AppResult<Self> {
        Ok(Self::builder(config).apply(options)?.build())
    }

    /// Resolve the client IP from `headers`, falling back to `remote_addr`.
    ///
    /// Sources are tried in the configured priority order; the first source
    /// yielding a valid address wins and is recorded as a success. Sources
    /// that are present but unusable record a failure and a security event.
    /// The transport address fallback always succeeds.
    pub fn extract(&self, headers: &HeaderMap, remote_addr: IpAddr) -> ClientIp {
        for source in self.config.header_order() {
            if let Some(ip) = self.try_source(*source, headers) {
                self.sink.record_extraction_success(*source);
                return ClientIp { ip, source: *source };
            }
        }

        self.sink
            .record_extraction_success(ExtractionSource::RemoteAddr);
        ClientIp {
            ip: remote_addr,
            source: ExtractionSource::RemoteAddr,
        }
    }

    /// Try a single header source. `None` means absent or rejected;
    /// rejections have already been recorded.
    fn try_source(&self, source: ExtractionSource, headers: &HeaderMap) -> Option<IpAddr> {
        let name = source.header_name()?;

        let mut values = headers.get_all(name).iter();
        let value = values.next()?;
        if values.next().is_some() {
            self.reject(source, EVENT_MULTIPLE_HEADERS);
            return None;
        }

        let Ok(raw) = value.to_str() else {
            self.reject(source, EVENT_INVALID_IP);
            return None;
        };

        let chain: Vec<&str> = match source {
            ExtractionSource::Forwarded => forwarded::for_chain(raw),
            ExtractionSource::XForwardedFor => raw.split(',').map(str::trim).collect(),
            ExtractionSource::XRealIp => vec![raw.trim()],
            ExtractionSource::RemoteAddr => unreachable!("remote_addr has no header"),
        };

        if chain.is_empty() {
            self.reject(source, EVENT_INVALID_IP);
            return None;
        }
        if chain.len() > self.config.max_chain_length() {
            self.reject(source, EVENT_CHAIN_TOO_LONG);
            return None;
        }

        // Rightmost-untrusted: proxies append to the right, so the
        // rightmost entry not in the trusted set is the client as seen by
        // our own infrastructure. Entries further left are client-supplied
        // and spoofable.
        let mut leftmost_trusted = None;
        for raw_node in chain.iter().rev() {
            match forwarded::parse_node(raw_node) {
                None => {
                    self.reject(source, EVENT_INVALID_IP);
                    return None;
                }
                Some(ip) if self.config.is_trusted(&ip) => {
                    leftmost_trusted = Some(ip);
                }
                Some(ip) => return Some(ip),
            }
        }

        // The whole chain is our own proxies; the leftmost entry is the
        // closest thing to a client the request carries.
        leftmost_trusted
    }

    fn reject(&self, source: ExtractionSource, event: &str) {
        tracing::debug!(
            source = source.as_str(),
            event,
            "discarding forwarding source"
        );
        self.sink.record_security_event(event);
        self.sink.record_extraction_failure(source);
    }
}

impl fmt::Debug for ClientIpExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIpExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
