//! Best-effort originating client address.
//!
//! Proxies and CDNs put the caller's address in a handful of headers. They
//! are consulted in a fixed priority order and every candidate must parse as
//! an IPv4/IPv6 address before it is accepted.

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Headers consulted after `X-Client-IP` and `X-Forwarded-For`, in order.
const SINGLE_VALUE_HEADERS: &[&str] = &[
    "cf-connecting-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

/// Resolve the client address for a request.
///
/// Falls back to `peer`, then to the raw `X-Forwarded-For` value when none of
/// its entries parsed. Returns `None` only when nothing at all is known.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(ip) = header_str(headers, "x-client-ip").filter(|v| is_ip(v)) {
        return Some(ip.to_string());
    }

    let forwarded_for = header_str(headers, "x-forwarded-for");
    if let Some(ip) = forwarded_for.and_then(from_forwarded_for) {
        return Some(ip);
    }

    for name in SINGLE_VALUE_HEADERS {
        if let Some(ip) = header_str(headers, name).map(str::trim).filter(|v| is_ip(v)) {
            return Some(ip.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .or_else(|| forwarded_for.map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty()))
}

/// Left-most valid address of an `X-Forwarded-For` list.
///
/// Entries may carry a port (`1.2.3.4:8080`, `[::1]:8080`) which is stripped.
/// Entries such as `unknown` are skipped.
pub fn from_forwarded_for(value: &str) -> Option<String> {
    value
        .split(',')
        .map(str::trim)
        .flat_map(candidates)
        .find(|candidate| is_ip(candidate))
}

fn candidates(entry: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(2);
    if let Some(rest) = entry.strip_prefix('[') {
        if let Some((host, _port)) = rest.split_once("]:") {
            out.push(host.to_string());
        } else if let Some(host) = rest.strip_suffix(']') {
            out.push(host.to_string());
        }
    } else {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() == 2 {
            out.push(parts[0].to_string());
        }
    }
    out.push(entry.to_string());
    out
}

fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
