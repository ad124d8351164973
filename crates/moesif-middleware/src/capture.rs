//! Request/response capture.
//!
//! A [`CapturedExchange`] records one HTTP transaction: what came in, what
//! went out and when. The middleware builds it around every call; callers
//! capturing outgoing traffic build it themselves with the `new`/`with_*`
//! constructors.

use crate::body::{self, EncodedBody};
use crate::client_ip;
use crate::error::BoxError;
use bytes::{Buf as _, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Header carrying the correlation id.
pub const TRANSACTION_ID_HEADER: &str = "X-Moesif-Transaction-Id";

pub(crate) static TRANSACTION_ID_HEADER_NAME: http::HeaderName =
    http::HeaderName::from_static("x-moesif-transaction-id");

/// Timestamp format used on the wire (UTC, millisecond precision).
pub(crate) const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Render a timestamp the way the collector expects it.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// The request half of an exchange.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub time: DateTime<Utc>,
    pub method: String,
    /// Absolute URL (`scheme://host/path?query`)
    pub url: String,
    pub ip_address: Option<String>,
    /// Header list in arrival order, original case.
    pub headers: Vec<(String, String)>,
    pub body: Option<EncodedBody>,
    pub transaction_id: Option<String>,
}

/// The response half of an exchange.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub time: DateTime<Utc>,
    /// Status line, e.g. `"200 OK"`.
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<EncodedBody>,
}

/// A finished request/response pair.
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    pub request: CapturedRequest,
    pub response: CapturedResponse,
}

impl CapturedRequest {
    /// Start a request record stamped with the current time.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            method: method.as_str().to_string(),
            url: url.into(),
            ip_address: None,
            headers: Vec::new(),
            body: None,
            transaction_id: None,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body, encoded according to the headers added so far.
    pub fn with_body(mut self, bytes: &[u8]) -> Self {
        self.body = encode_body(bytes, &self.headers);
        self
    }

    /// Set the client address.
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Capture an inbound request.
    ///
    /// The peer address is read from a [`SocketAddr`] request extension when
    /// the server provides one. With `transaction_ids` set, the id from the
    /// incoming `X-Moesif-Transaction-Id` header is reused, or a fresh UUID is
    /// generated, and recorded as a request header.
    pub fn from_parts(parts: &Parts, body: &[u8], transaction_ids: bool) -> Self {
        let mut headers = header_list(&parts.headers);

        let transaction_id = transaction_ids.then(|| {
            let id = parts
                .headers
                .get(&TRANSACTION_ID_HEADER_NAME)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if !parts.headers.contains_key(&TRANSACTION_ID_HEADER_NAME) {
                headers.push((TRANSACTION_ID_HEADER_NAME.as_str().to_string(), id.clone()));
            }
            id
        });

        let peer = parts.extensions.get::<SocketAddr>().copied();

        Self {
            time: Utc::now(),
            method: parts.method.as_str().to_string(),
            url: request_url(parts),
            ip_address: client_ip::resolve(&parts.headers, peer),
            body: encode_body(body, &headers),
            headers,
            transaction_id,
        }
    }

    /// Case-insensitive header lookup (last value wins).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl CapturedResponse {
    /// Start a response record stamped with the current time.
    pub fn new(status: StatusCode) -> Self {
        Self {
            time: Utc::now(),
            status_line: status_line(status),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body, encoded according to the headers added so far.
    pub fn with_body(mut self, bytes: &[u8]) -> Self {
        self.body = encode_body(bytes, &self.headers);
        self
    }

    /// Case-insensitive header lookup (last value wins).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Accumulates a response while it is being produced.
///
/// Status and headers are recorded when the response starts; body chunks
/// are appended as they are read and the record is sealed by
/// [`finish`](Self::finish).
#[derive(Debug)]
pub(crate) struct ResponseCapture {
    status_line: String,
    headers: Vec<(String, String)>,
    chunks: BytesMut,
}

impl ResponseCapture {
    pub(crate) fn start(status: StatusCode, headers: &HeaderMap) -> Self {
        Self {
            status_line: status_line(status),
            headers: header_list(headers),
            chunks: BytesMut::new(),
        }
    }

    pub(crate) fn push_chunk(&mut self, chunk: &[u8]) {
        self.chunks.extend_from_slice(chunk);
    }

    /// Read every data frame of `body` into a body the caller can replay.
    ///
    /// A body error ends the read. The bytes seen so far stay in the capture
    /// and the replayed body fails with the same error after yielding them.
    pub(crate) async fn read_body<B>(&mut self, mut body: B) -> ReplayBody
    where
        B: Body + Unpin,
        B::Error: Into<BoxError>,
    {
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Ok(mut data) = frame.into_data() {
                        let bytes = data.copy_to_bytes(data.remaining());
                        self.push_chunk(&bytes);
                    }
                }
                Err(err) => {
                    let err: BoxError = err.into();
                    tracing::warn!(error = %err, "Response body failed mid-stream");
                    return ReplayBody::failed(self.chunks.clone().freeze(), err);
                }
            }
        }
        ReplayBody::new(self.chunks.clone().freeze())
    }

    pub(crate) fn finish(self) -> CapturedResponse {
        CapturedResponse {
            time: Utc::now(),
            body: encode_body(&self.chunks, &self.headers),
            status_line: self.status_line,
            headers: self.headers,
        }
    }
}

/// Collect a request body; `None` when the stream failed.
pub(crate) async fn read_request_body<B>(body: B) -> Option<Bytes>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    match body.collect().await {
        Ok(collected) => Some(collected.to_bytes()),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read request body");
            None
        }
    }
}

/// Response body returned by the middleware.
///
/// Yields the buffered bytes as one frame. When the wrapped service's body
/// failed, the error follows the bytes that arrived before it.
#[derive(Debug)]
pub struct ReplayBody {
    data: Option<Bytes>,
    error: Option<BoxError>,
}

impl ReplayBody {
    pub(crate) fn new(data: Bytes) -> Self {
        Self {
            data: Some(data).filter(|d| !d.is_empty()),
            error: None,
        }
    }

    pub(crate) fn failed(data: Bytes, error: BoxError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(data)
        }
    }
}

impl Body for ReplayBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        Poll::Ready(self.error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.error.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        let len = self.data.as_ref().map_or(0, Bytes::len) as u64;
        if self.error.is_some() {
            let mut hint = SizeHint::new();
            hint.set_lower(len);
            hint
        } else {
            SizeHint::with_exact(len)
        }
    }
}

fn encode_body(bytes: &[u8], headers: &[(String, String)]) -> Option<EncodedBody> {
    if bytes.is_empty() {
        return None;
    }
    Some(body::encode(bytes, find_header(headers, "content-encoding"), headers))
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn header_list(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Rebuild the absolute URL of an inbound request.
fn request_url(parts: &Parts) -> String {
    let scheme = parts.uri.scheme_str().unwrap_or("http");
    let host = parts
        .uri
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            parts
                .headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| "localhost".to_string());
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}://{}{}", scheme, host, path_and_query)
}
