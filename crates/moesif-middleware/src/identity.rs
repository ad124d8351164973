//! User id fallback from authorization headers.
//!
//! Used when no `identify_user` hook resolved an id. Understands bearer JWTs,
//! basic credentials and custom tokens carrying a base64 JSON payload.

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use http::HeaderMap;
use serde_json::{Map, Value};

/// Extract a user id from the first configured authorization header present.
///
/// `header_names` is a comma-separated list; `field` is the payload claim
/// holding the id (matched case-insensitively).
pub fn user_from_authorization(headers: &HeaderMap, header_names: &str, field: &str, debug: bool) -> Option<String> {
    let token = find_token(headers, header_names)?;
    let field = field.trim().to_ascii_lowercase();

    if let Some(rest) = token_after(&token, "Bearer") {
        let segments: Vec<&str> = rest.split('.').collect();
        if segments.len() >= 3 && !segments[1].is_empty() {
            return claim_from_payload(segments[1], &field, debug);
        }
        return None;
    }

    if let Some(rest) = token_after(&token, "Basic") {
        let decoded = decode_segment(rest)?;
        let text = String::from_utf8(decoded).ok()?;
        let username = text.split(':').next().unwrap_or_default().trim();
        return (!username.is_empty()).then(|| username.to_string());
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() > 1 && !segments[1].is_empty() {
        claim_from_payload(segments[1], &field, debug)
    } else {
        claim_from_payload(&token, &field, debug)
    }
}

fn find_token(headers: &HeaderMap, header_names: &str) -> Option<String> {
    header_names
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .find_map(|name| headers.get(name.as_str()))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|first| first.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn token_after<'a>(token: &'a str, scheme: &str) -> Option<&'a str> {
    token.find(scheme).map(|idx| token[idx + scheme.len()..].trim())
}

fn claim_from_payload(segment: &str, field: &str, debug: bool) -> Option<String> {
    let claims = decode_segment(segment)
        .and_then(|bytes| serde_json::from_slice::<Map<String, Value>>(&bytes).ok());

    let Some(claims) = claims else {
        if debug {
            tracing::info!("Authorization header payload is not base64 JSON, no user id extracted");
        }
        return None;
    };

    claims
        .into_iter()
        .find(|(key, _)| key.to_ascii_lowercase() == field)
        .map(|(_, value)| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
}

/// Decode base64 in either alphabet, with or without padding.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}
