//! Canonical event shape sent to the collector.

use crate::body::TransferEncoding;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Direction of the captured call relative to this application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Direction {
    /// A call received by the application.
    #[default]
    Incoming,
    /// A call the application made to another service.
    Outgoing,
}

/// Request half of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventRequest {
    /// Request start, `YYYY-MM-DDTHH:MM:SS.mmm` in UTC
    pub time: String,
    /// Full request URL
    pub uri: String,
    /// HTTP method
    pub verb: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<TransferEncoding>,
}

/// Response half of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventResponse {
    pub time: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_encoding: Option<TransferEncoding>,
}

/// One captured API call.
///
/// `weight` stays `None` until the sampling decision admits the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Event {
    pub request: EventRequest,
    pub response: EventResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    pub direction: Direction,
    /// Id of the governance rule that blocked the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}
