//! Client IP resolution middleware
//!
//! Runs the extractor against each request's forwarding headers and makes
//! the resolved [`ClientIp`](crate::extractor::ClientIp) available to
//! handlers via Axum extensions.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::handlers::AppState;

/// Middleware that resolves and attaches the client IP to each request
///
/// The transport address comes from `ConnectInfo`, present when the server
/// is started with `into_make_service_with_connect_info`. Without it (e.g.
/// a router driven directly in tests) the unspecified address stands in as
/// the remote, and header extraction proceeds as usual.
pub async fn middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| {
            addr.ip()
        });

    let client_ip = state.extractor().extract(request.headers(), remote_addr);

    tracing::debug!(
        ip = %client_ip.ip,
        source = client_ip.source.as_str(),
        "resolved client ip"
    );

    request.extensions_mut().insert(client_ip);

    next.run(request).await
}
