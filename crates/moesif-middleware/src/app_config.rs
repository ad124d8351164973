//! Application configuration served by the collector's `/config` endpoint.

use crate::event::Event;
use crate::regex_config::{ConditionGroup, RequestFields};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Sample rate used when nothing else applies.
pub const DEFAULT_SAMPLE_RATE: f64 = 100.0;

/// A regex sampling rule: the first matching rule sets the rate.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingRule {
    #[serde(flatten)]
    pub group: ConditionGroup,
    pub sample_rate: f64,
}

/// Cohort membership of one user or company in one governance rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleValues {
    /// Governance rule id.
    pub rules: String,
    /// Merge-tag values for that rule.
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Parsed `/config` body.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sample_rate: f64,
    pub user_sample_rate: HashMap<String, f64>,
    pub company_sample_rate: HashMap<String, f64>,
    pub regex_config: Vec<SamplingRule>,
    pub user_rules: HashMap<String, Vec<RuleValues>>,
    pub company_rules: HashMap<String, Vec<RuleValues>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            user_sample_rate: HashMap::new(),
            company_sample_rate: HashMap::new(),
            regex_config: Vec::new(),
            user_rules: HashMap::new(),
            company_rules: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Parse a config body.
    ///
    /// Never fails: malformed sections fall back to their defaults and a
    /// body that is not JSON yields the default config (100% sampling).
    pub fn parse(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "Config body is not JSON, using default sampling");
                return Self::default();
            }
        };

        let regex_config = value
            .get("regex_config")
            .and_then(Value::as_array)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| serde_json::from_value::<SamplingRule>(rule.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            sample_rate: value
                .get("sample_rate")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            user_sample_rate: section(&value, "user_sample_rate"),
            company_sample_rate: section(&value, "company_sample_rate"),
            regex_config,
            user_rules: section(&value, "user_rules"),
            company_rules: section(&value, "company_rules"),
        }
    }

    /// Effective sampling percentage for an event.
    ///
    /// Precedence: first matching regex rule, then the user override, then
    /// the company override, then the global rate.
    pub fn get_sampling_percentage(&self, event: &Event, user_id: Option<&str>, company_id: Option<&str>) -> f64 {
        if !self.regex_config.is_empty() {
            let fields = RequestFields::from_event(event);
            if let Some(rule) = self.regex_config.iter().find(|rule| rule.group.matches(&fields)) {
                return rule.sample_rate;
            }
        }

        if let Some(rate) = user_id.and_then(|id| self.user_sample_rate.get(id)) {
            return *rate;
        }

        if let Some(rate) = company_id.and_then(|id| self.company_sample_rate.get(id)) {
            return *rate;
        }

        self.sample_rate
    }

    /// Governance cohort entries for a user.
    pub fn user_rule_values(&self, user_id: &str) -> &[RuleValues] {
        self.user_rules.get(user_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Governance cohort entries for a company.
    pub fn company_rule_values(&self, company_id: &str) -> &[RuleValues] {
        self.company_rules.get(company_id).map(Vec::as_slice).unwrap_or_default()
    }
}

fn section<T: DeserializeOwned + Default>(value: &Value, name: &str) -> T {
    match value.get(name) {
        None | Some(Value::Null) => T::default(),
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|err| {
            tracing::debug!(section = name, error = %err, "Ignoring malformed config section");
            T::default()
        }),
    }
}
