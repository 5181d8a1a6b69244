//! Command-line interface for TrueIP
//!
//! Provides argument parsing and subcommand handling for the trueip binary.

use clap::{Parser, Subcommand};

/// Trusted client IP extraction service
#[derive(Parser)]
#[command(name = "trueip")]
#[command(version)]
#[command(about = "Trusted client IP extraction service")]
#[command(
    long_about = "TrueIP resolves the real client IP of HTTP requests behind proxy chains \
    from Forwarded, X-Forwarded-For, and X-Real-Ip headers, and exposes extraction \
    outcomes as Prometheus counters."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate a configuration file and exit
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# TrueIP Configuration
# ====================
#
# This file configures the HTTP server, client IP extraction behavior,
# and observability settings for TrueIP.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# CLIENT IP EXTRACTION
# ─────────────────────────────────────────────────────────────────────────────

[extraction]
# Header sources tried in order. The transport remote address is the
# implicit final fallback and must not be listed here.
# Options: "forwarded" (RFC 7239), "x_forwarded_for", "x_real_ip"
header_order = ["forwarded", "x_forwarded_for", "x_real_ip"]

# Addresses of your own reverse proxies / load balancers. Forwarding-chain
# entries matching these are skipped when resolving the client address.
# Leave empty if TrueIP faces clients directly.
trusted_proxies = []

# Forwarding chains longer than this are rejected as suspicious and
# recorded as a chain_too_long security event. Range: 1-100.
max_chain_length = 10

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port.
# For production, consider using a reverse proxy to restrict access.
"#
}
