//! Body codec.
//!
//! Turns raw request/response payloads into a transport-safe value: bodies
//! that look like JSON are embedded as structured JSON, everything else is
//! base64 encoded (gzip payloads are inflated first). Encoding never fails;
//! base64 of the original bytes is the terminal fallback.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;

/// How an encoded body is represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferEncoding {
    /// The body is embedded as a JSON value.
    Json,
    /// The body is a base64 string of the (decompressed) bytes.
    Base64,
}

impl TransferEncoding {
    /// Wire name of the encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Base64 => "base64",
        }
    }
}

/// A body after encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    /// The transport value (JSON tree or base64 string).
    pub value: Value,
    /// Tag describing `value`.
    pub transfer_encoding: TransferEncoding,
}

impl EncodedBody {
    fn base64(bytes: &[u8]) -> Self {
        Self {
            value: Value::String(STANDARD.encode(bytes)),
            transfer_encoding: TransferEncoding::Base64,
        }
    }
}

/// Encode a body.
///
/// `content_encoding` is an explicit hint (e.g. the request's
/// `Content-Encoding`); `headers` are searched case-insensitively for a
/// `content-encoding` entry when no hint is given.
pub fn encode(body: &[u8], content_encoding: Option<&str>, headers: &[(String, String)]) -> EncodedBody {
    if let Ok(text) = std::str::from_utf8(body) {
        if starts_like_json(text) {
            if let Ok(value) = serde_json::from_str::<Value>(text) {
                return EncodedBody {
                    value,
                    transfer_encoding: TransferEncoding::Json,
                };
            }
        }
    }

    if is_gzip(content_encoding, headers) {
        return match gunzip(body) {
            Ok(inflated) => EncodedBody::base64(&inflated),
            Err(err) => {
                tracing::debug!(error = %err, "gzip body could not be inflated, sending raw bytes");
                EncodedBody::base64(body)
            }
        };
    }

    EncodedBody::base64(body)
}

/// Decode an encoded body back to bytes.
///
/// JSON bodies come back in compact serialization, which is equal in value
/// (not necessarily byte for byte) to the original text.
pub fn decode(encoded: &EncodedBody) -> Option<Vec<u8>> {
    match encoded.transfer_encoding {
        TransferEncoding::Json => serde_json::to_vec(&encoded.value).ok(),
        TransferEncoding::Base64 => encoded
            .value
            .as_str()
            .and_then(|s| STANDARD.decode(s).ok()),
    }
}

fn starts_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

fn is_gzip(content_encoding: Option<&str>, headers: &[(String, String)]) -> bool {
    if let Some(hint) = content_encoding {
        if hint.to_ascii_lowercase().contains("gzip") {
            return true;
        }
    }
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("content-encoding"))
        .any(|(_, value)| value.to_ascii_lowercase().contains("gzip"))
}

fn gunzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
