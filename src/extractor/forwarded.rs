//! RFC 7239 `Forwarded` header parsing
//!
//! Only the `for=` parameter is of interest; `by`, `host`, and `proto` are
//! ignored. Node identifiers may be quoted, bracketed IPv6, carry a port,
//! or be the `unknown` / `_obfuscated` forms that RFC 7239 permits.

use std::net::{IpAddr, SocketAddr};

/// Extract the forwarding chain from a `Forwarded` header value.
///
/// Each comma-separated element contributes its `for=` parameter, in order.
/// Elements without one (e.g. `proto=https`) are skipped. Values are
/// returned raw; [`parse_node`] handles quoting and ports.
pub(crate) fn for_chain(value: &str) -> Vec<&str> {
    value
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, val) = param.split_once('=')?;
                key.trim().eq_ignore_ascii_case("for").then(|| val.trim())
            })
        })
        .collect()
}

/// Parse a node identifier into an IP address.
///
/// Accepts bare IPv4/IPv6, `ip:port`, bracketed `[v6]` with or without a
/// port, and optional surrounding quotes. Returns `None` for `unknown`,
/// obfuscated identifiers (leading underscore), and anything unparsable.
pub(crate) fn parse_node(raw: &str) -> Option<IpAddr> {
    let node = raw.trim().trim_matches('"');
    if node.is_empty() || node.eq_ignore_ascii_case("unknown") || node.starts_with('_') {
        return None;
    }

    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    // Covers "1.2.3.4:80" and "[::1]:80".
    if let Ok(sock) = node.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    // Bracketed IPv6 without a port is not a valid SocketAddr.
    if let Some(inner) = node.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        return inner.parse().ok();
    }

    None
}
