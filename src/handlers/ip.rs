//! Client IP echo endpoint
//!
//! Returns the IP the extraction pipeline resolved for the calling request,
//! together with the source it came from. Useful both as the service's
//! actual product ("what is my IP as you see it") and as a live check of
//! the trusted-proxy configuration.

use std::net::IpAddr;

use axum::{Extension, Json};
use serde::Serialize;

use crate::extractor::ClientIp;
use crate::metrics::ExtractionSource;

/// Client IP response
#[derive(Debug, Serialize)]
pub struct ClientIpResponse {
    /// The resolved client address
    pub ip: IpAddr,
    /// Which source produced it
    pub source: ExtractionSource,
}

/// Client IP handler
///
/// Reads the [`ClientIp`] extension attached by the client IP middleware.
pub async fn handler(Extension(client_ip): Extension<ClientIp>) -> Json<ClientIpResponse> {
    Json(ClientIpResponse {
        ip: client_ip.ip,
        source: client_ip.source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_echoes_extension() {
        let client_ip = ClientIp {
            ip: "198.51.100.17".parse().expect("should parse"),
            source: ExtractionSource::XForwardedFor,
        };

        let Json(body) = handler(Extension(client_ip)).await;

        assert_eq!(body.ip, client_ip.ip);
        assert_eq!(body.source, ExtractionSource::XForwardedFor);
    }

    #[test]
    fn response_serializes_source_as_label() {
        let body = ClientIpResponse {
            ip: "203.0.113.9".parse().expect("should parse"),
            source: ExtractionSource::XRealIp,
        };
        let json = serde_json::to_string(&body).expect("should serialize");
        assert_eq!(json, r#"{"ip":"203.0.113.9","source":"x_real_ip"}"#);
    }
}
