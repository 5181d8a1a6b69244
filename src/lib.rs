//! TrueIP - trusted client IP extraction behind proxy chains
//!
//! Resolves the real client IP of HTTP requests from forwarding headers
//! (`Forwarded`, `X-Forwarded-For`, `X-Real-Ip`) or the transport address,
//! and reports extraction outcomes as Prometheus counters.

pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod telemetry;
