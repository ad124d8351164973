//! Regex conditions shared by sampling rules and governance rules.
//!
//! A condition names a request field by path (`request.verb`,
//! `request.route`, `request.ip_address`, `response.status`,
//! `request.body.<dotted.path>`) and a pattern searched in that field's
//! value. Conditions in a group are AND-ed; groups in a list are OR-ed.

use crate::event::Event;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// One `{path, value}` condition with its pattern compiled.
///
/// A pattern that does not compile never matches.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawCondition")]
pub struct Condition {
    pub path: String,
    pattern: Option<Regex>,
}

#[derive(Deserialize)]
struct RawCondition {
    #[serde(default)]
    path: String,
    #[serde(default)]
    value: String,
}

impl From<RawCondition> for Condition {
    fn from(raw: RawCondition) -> Self {
        let pattern = match Regex::new(&raw.value) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::debug!(path = %raw.path, error = %err, "Ignoring condition with an invalid pattern");
                None
            }
        };
        Self {
            path: raw.path,
            pattern,
        }
    }
}

impl Condition {
    /// Build a condition from a path and a pattern.
    pub fn new(path: impl Into<String>, pattern: &str) -> Self {
        RawCondition {
            path: path.into(),
            value: pattern.to_string(),
        }
        .into()
    }

    /// Whether the field named by this condition is present and matches.
    pub fn matches(&self, fields: &RequestFields) -> bool {
        match (&self.pattern, fields.get(&self.path)) {
            (Some(re), Some(value)) if !value.is_empty() => re.is_match(&value),
            _ => false,
        }
    }
}

/// Conditions that must all hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    /// An empty group never matches.
    pub fn matches(&self, fields: &RequestFields) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(fields))
    }
}

/// Whether any group of a rule's `regex_config` matches.
///
/// A rule without any group applies to every request.
pub fn any_group_matches(groups: &[ConditionGroup], fields: &RequestFields) -> bool {
    groups.is_empty() || groups.iter().any(|group| group.matches(fields))
}

/// Request attributes conditions are evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RequestFields {
    pub verb: Option<String>,
    pub route: Option<String>,
    pub ip_address: Option<String>,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl RequestFields {
    /// Fields of a finished event.
    pub fn from_event(event: &Event) -> Self {
        Self {
            verb: Some(event.request.verb.clone()).filter(|v| !v.is_empty()),
            route: Some(route_of(&event.request.uri)),
            ip_address: event.request.ip_address.clone(),
            status: Some(event.response.status).filter(|s| *s != 0),
            body: event.request.body.clone(),
        }
    }

    /// Value of a condition path, rendered as text.
    pub fn get(&self, path: &str) -> Option<String> {
        if let Some(body_path) = path.strip_prefix("request.body.") {
            return self.body.as_ref().and_then(|body| lookup(body, body_path));
        }
        match path {
            "request.verb" => self.verb.clone(),
            "request.route" => self.route.clone(),
            "request.ip_address" => self.ip_address.clone(),
            "response.status" => self.status.map(|s| s.to_string()),
            _ => None,
        }
    }
}

/// Path part of a URL, without query. `/` when there is none.
pub fn route_of(url: &str) -> String {
    let after_scheme = url.find("://").map(|i| &url[i + 3..]).unwrap_or(url);
    let path_start = if url.contains("://") {
        after_scheme.find('/')
    } else {
        after_scheme.starts_with('/').then_some(0)
    };
    let Some(start) = path_start else {
        return "/".to_string();
    };
    let path = &after_scheme[start..];
    let path = path.split(['?', '#']).next().unwrap_or("/");
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn lookup(body: &Value, dotted: &str) -> Option<String> {
    let mut current = body;
    for key in dotted.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
