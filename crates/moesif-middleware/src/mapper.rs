//! Captured exchange to [`Event`] conversion.

use crate::capture::{format_time, CapturedExchange};
use crate::event::{Direction, Event, EventRequest, EventResponse};
use crate::hooks::{isolate, MoesifHooks};
use std::collections::HashMap;

/// Identity and metadata resolved for one exchange.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub session_token: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Build the canonical event for an exchange.
///
/// Bodies are only included when `log_body` is set. `weight` is left unset
/// for the sampling decision.
pub fn to_event(
    exchange: &CapturedExchange,
    log_body: bool,
    api_version: Option<&str>,
    blocked_by: Option<&str>,
) -> Event {
    let req = &exchange.request;
    let res = &exchange.response;

    let (request_body, request_encoding) = match (&req.body, log_body) {
        (Some(body), true) => (Some(body.value.clone()), Some(body.transfer_encoding)),
        _ => (None, None),
    };
    let (response_body, response_encoding) = match (&res.body, log_body) {
        (Some(body), true) => (Some(body.value.clone()), Some(body.transfer_encoding)),
        _ => (None, None),
    };

    Event {
        request: EventRequest {
            time: format_time(&req.time),
            uri: req.url.clone(),
            verb: req.method.clone(),
            api_version: api_version.map(String::from),
            ip_address: req.ip_address.clone(),
            headers: header_map(&req.headers),
            body: request_body,
            transfer_encoding: request_encoding,
        },
        response: EventResponse {
            time: format_time(&res.time),
            status: parse_status(&res.status_line),
            headers: header_map(&res.headers),
            body: response_body,
            transfer_encoding: response_encoding,
        },
        blocked_by: blocked_by.map(String::from),
        direction: Direction::Incoming,
        ..Default::default()
    }
}

/// Copy resolved identity onto an event.
pub fn with_identity(mut event: Event, identity: Identity) -> Event {
    event.user_id = identity.user_id;
    event.company_id = identity.company_id;
    event.session_token = identity.session_token;
    event.metadata = identity.metadata;
    event
}

/// Run the mask hook. A failing hook leaves the event unmasked.
pub(crate) fn mask(hooks: &dyn MoesifHooks, event: Event, debug: bool) -> Event {
    let fallback = event.clone();
    isolate("mask_event", debug, || hooks.mask_event(event)).unwrap_or(fallback)
}

fn header_map(headers: &[(String, String)]) -> HashMap<String, String> {
    headers.iter().cloned().collect()
}

/// Integer status from the first three characters of a status line.
fn parse_status(status_line: &str) -> u16 {
    status_line
        .get(..3)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}
