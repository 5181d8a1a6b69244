//! Configuration management for TrueIP
//!
//! Parses TOML configuration files and provides typed access to settings.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::metrics::ExtractionSource;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, is not valid
    /// TOML, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            AppError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants not expressible in serde.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation found.
    pub fn validate(&self) -> AppResult<()> {
        self.server.host.parse::<IpAddr>().map_err(|_| {
            AppError::Config(format!(
                "server.host must be an IP address to bind, got {:?}",
                self.server.host
            ))
        })?;
        self.extraction.validate()
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Client IP extraction configuration
///
/// Fields are private to enforce invariants. Configuration is loaded via
/// deserialization and checked by `Config::validate()`; programmatic
/// construction goes through [`ExtractionConfig::new`], which validates
/// eagerly.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Header sources tried in order before the transport address.
    #[serde(default = "default_header_order")]
    header_order: Vec<ExtractionSource>,
    /// Addresses of our own proxies, skipped during chain evaluation.
    #[serde(default)]
    trusted_proxies: Vec<IpAddr>,
    /// Longest forwarding chain accepted before the source is rejected.
    #[serde(default = "default_max_chain_length")]
    max_chain_length: usize,
}

/// Upper bound on configurable chain length; beyond this, header parsing
/// cost becomes a request-time liability.
const MAX_CHAIN_LENGTH_LIMIT: usize = 100;

impl ExtractionConfig {
    /// Create a validated extraction config.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `max_chain_length` is out of range or
    /// `header_order` lists `remote_addr` or contains duplicates.
    pub fn new(
        header_order: Vec<ExtractionSource>,
        trusted_proxies: Vec<IpAddr>,
        max_chain_length: usize,
    ) -> AppResult<Self> {
        let config = Self {
            header_order,
            trusted_proxies,
            max_chain_length,
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        if self.max_chain_length == 0 || self.max_chain_length > MAX_CHAIN_LENGTH_LIMIT {
            return Err(AppError::Config(format!(
                "extraction.max_chain_length must be in 1..={MAX_CHAIN_LENGTH_LIMIT}, got {}",
                self.max_chain_length
            )));
        }
        for (i, source) in self.header_order.iter().enumerate() {
            if *source == ExtractionSource::RemoteAddr {
                return Err(AppError::Config(
                    "extraction.header_order must not list remote_addr; it is the implicit fallback"
                        .to_string(),
                ));
            }
            if self.header_order[..i].contains(source) {
                return Err(AppError::Config(format!(
                    "extraction.header_order lists {} twice",
                    source.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Header sources in priority order.
    pub fn header_order(&self) -> &[ExtractionSource] {
        &self.header_order
    }

    /// Whether `ip` belongs to our own proxy tier.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.contains(ip)
    }

    /// Longest accepted forwarding chain.
    pub fn max_chain_length(&self) -> usize {
        self.max_chain_length
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            header_order: default_header_order(),
            trusted_proxies: Vec::new(),
            max_chain_length: default_max_chain_length(),
        }
    }
}

fn default_header_order() -> Vec<ExtractionSource> {
    vec![
        ExtractionSource::Forwarded,
        ExtractionSource::XForwardedFor,
        ExtractionSource::XRealIp,
    ]
}

fn default_max_chain_length() -> usize {
    10
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
