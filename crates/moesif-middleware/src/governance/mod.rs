//! Governance: rule-driven blocking and header injection.
//!
//! Rules are evaluated in three passes (regex rules, then company rules,
//! then user rules). Every applicable rule contributes its response headers;
//! a blocking rule additionally replaces status and body, the last one
//! processed winning.

mod merge_tags;
mod rules;

pub use merge_tags::{render, render_str, UNKNOWN};
pub use rules::{AppliedTo, GovernanceRule, GovernanceRules, RuleKind, RuleResponse, RuleVariable};

use crate::app_config::{AppConfig, RuleValues};
use crate::error::GovernanceError;
use crate::regex_config::RequestFields;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::Full;
use rules::EntityRules;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Response replacement decided by a blocking rule.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedResponse {
    pub rule_id: String,
    pub status: Option<u16>,
    pub body: Option<Value>,
}

/// Result of evaluating governance for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernanceOutcome {
    /// Headers to add to the response, last applied rule wins per name.
    pub headers: BTreeMap<String, String>,
    pub blocked: Option<BlockedResponse>,
}

impl GovernanceOutcome {
    /// Id of the rule that blocked the request.
    pub fn blocked_by(&self) -> Option<&str> {
        self.blocked.as_ref().map(|b| b.rule_id.as_str())
    }

    /// Whether evaluation has no effect on the response.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.blocked.is_none()
    }

    /// Rule headers as an HTTP header map.
    pub fn header_map(&self) -> Result<HeaderMap, GovernanceError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = || GovernanceError::InvalidHeader {
                rule_id: self.blocked_by().unwrap_or_default().to_string(),
                name: name.clone(),
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// The synthesized response of a blocked request.
    ///
    /// `None` when no rule blocked.
    pub fn blocked_response(&self) -> Result<Option<Response<Full<Bytes>>>, GovernanceError> {
        let Some(blocked) = &self.blocked else {
            return Ok(None);
        };

        let raw_status = blocked.status.unwrap_or(0);
        let status = StatusCode::from_u16(raw_status).map_err(|_| GovernanceError::InvalidStatus {
            rule_id: blocked.rule_id.clone(),
            status: raw_status,
        })?;

        let headers = self.header_map()?;
        let (body, is_json) = match &blocked.body {
            None | Some(Value::Null) => (Bytes::new(), false),
            Some(Value::String(text)) => (Bytes::from(text.clone()), false),
            Some(other) => (Bytes::from(other.to_string()), true),
        };

        let mut builder = Response::builder().status(status);
        if is_json && !headers.contains_key(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let mut response = builder.body(Full::new(body))?;
        response.headers_mut().extend(headers);
        Ok(Some(response))
    }
}

/// Identity a request was resolved to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subject<'a> {
    pub user_id: Option<&'a str>,
    pub company_id: Option<&'a str>,
}

/// Evaluate every applicable rule for a request.
///
/// `config` supplies cohort membership; without it only regex rules,
/// unidentified rules and `not_matching` rules can apply.
pub fn evaluate(
    rules: &GovernanceRules,
    config: Option<&AppConfig>,
    fields: &RequestFields,
    subject: Subject<'_>,
) -> GovernanceOutcome {
    let mut outcome = GovernanceOutcome::default();
    if rules.is_empty() {
        return outcome;
    }

    for rule in rules.regex.iter().filter(|rule| rule.matches(fields)) {
        apply(&mut outcome, rule, None);
    }

    let company_cohorts: &[RuleValues] = match (subject.company_id, config) {
        (Some(id), Some(cfg)) => cfg.company_rule_values(id),
        _ => &[],
    };
    apply_entity_rules(&mut outcome, &rules.company, subject.company_id.is_some(), company_cohorts, fields);

    let user_cohorts: &[RuleValues] = match (subject.user_id, config) {
        (Some(id), Some(cfg)) => cfg.user_rule_values(id),
        _ => &[],
    };
    apply_entity_rules(&mut outcome, &rules.user, subject.user_id.is_some(), user_cohorts, fields);

    outcome
}

fn apply_entity_rules(
    outcome: &mut GovernanceOutcome,
    rules: &EntityRules,
    identified: bool,
    cohorts: &[RuleValues],
    fields: &RequestFields,
) {
    if !identified {
        for rule in rules.unidentified().filter(|rule| rule.matches(fields)) {
            apply(outcome, rule, None);
        }
        return;
    }

    let mut in_cohort = HashSet::new();
    for entry in cohorts {
        in_cohort.insert(entry.rules.as_str());
        let Some(rule) = rules.get(&entry.rules) else {
            tracing::debug!(rule_id = %entry.rules, "Cohort refers to an unknown governance rule");
            continue;
        };
        if rule.applied_to == AppliedTo::NotMatching || !rule.matches(fields) {
            continue;
        }
        apply(outcome, rule, Some(&entry.values));
    }

    for rule in rules.all() {
        if rule.applied_to == AppliedTo::NotMatching
            && !in_cohort.contains(rule.id.as_str())
            && rule.matches(fields)
        {
            apply(outcome, rule, None);
        }
    }
}

fn apply(outcome: &mut GovernanceOutcome, rule: &GovernanceRule, cohort_values: Option<&Map<String, Value>>) {
    let values = variable_values(rule, cohort_values);

    for (name, template) in &rule.response.headers {
        outcome.headers.insert(name.clone(), render_str(template, &values));
    }

    if rule.block {
        tracing::debug!(rule_id = %rule.id, "Request blocked by governance rule");
        outcome.blocked = Some(BlockedResponse {
            rule_id: rule.id.clone(),
            status: rule.response.status,
            body: rule.response.body.as_ref().map(|body| render(body, &values)),
        });
    }
}

fn variable_values(rule: &GovernanceRule, cohort_values: Option<&Map<String, Value>>) -> HashMap<String, String> {
    rule.variables
        .iter()
        .map(|var| {
            let value = cohort_values
                .and_then(|values| values.get(&var.name))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| UNKNOWN.to_string());
            (var.name.clone(), value)
        })
        .collect()
}
