//! Governance rule model and the per-refresh rule index.

use crate::regex_config::{any_group_matches, ConditionGroup, RequestFields};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Which entities a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    User,
    Company,
    Regex,
}

/// Whether a user/company rule applies to its cohort or to everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedTo {
    #[default]
    Matching,
    NotMatching,
}

/// Response override carried by a rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleResponse {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Merge-tag variable declared by a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleVariable {
    pub name: String,
}

/// One governance rule as served by `/governance-rules`.
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceRule {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub applied_to: AppliedTo,
    #[serde(default)]
    pub applied_to_unidentified: bool,
    #[serde(default)]
    pub regex_config: Vec<ConditionGroup>,
    #[serde(default)]
    pub response: RuleResponse,
    #[serde(default)]
    pub block: bool,
    #[serde(default)]
    pub variables: Vec<RuleVariable>,
}

impl GovernanceRule {
    /// Whether the rule's regex conditions accept this request.
    pub fn matches(&self, fields: &RequestFields) -> bool {
        any_group_matches(&self.regex_config, fields)
    }
}

/// Rules of one entity kind, kept in served order with an id index.
#[derive(Debug, Default)]
pub(crate) struct EntityRules {
    rules: Vec<GovernanceRule>,
    by_id: HashMap<String, usize>,
    unidentified: Vec<usize>,
}

impl EntityRules {
    fn push(&mut self, rule: GovernanceRule) {
        let idx = self.rules.len();
        self.by_id.insert(rule.id.clone(), idx);
        if rule.applied_to_unidentified {
            self.unidentified.push(idx);
        }
        self.rules.push(rule);
    }

    pub(crate) fn get(&self, id: &str) -> Option<&GovernanceRule> {
        self.by_id.get(id).map(|&idx| &self.rules[idx])
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = &GovernanceRule> {
        self.rules.iter()
    }

    pub(crate) fn unidentified(&self) -> impl Iterator<Item = &GovernanceRule> {
        self.unidentified.iter().map(|&idx| &self.rules[idx])
    }

    fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Indexed rule set. Rebuilt as a whole on every refresh.
#[derive(Debug, Default)]
pub struct GovernanceRules {
    pub(crate) regex: Vec<GovernanceRule>,
    pub(crate) user: EntityRules,
    pub(crate) company: EntityRules,
}

impl GovernanceRules {
    /// Index a list of rules.
    pub fn new(rules: impl IntoIterator<Item = GovernanceRule>) -> Self {
        let mut index = Self::default();
        for rule in rules {
            match rule.kind {
                RuleKind::Regex => index.regex.push(rule),
                RuleKind::User => index.user.push(rule),
                RuleKind::Company => index.company.push(rule),
            }
        }
        index
    }

    /// Parse a `/governance-rules` body.
    ///
    /// Entries that do not deserialize are skipped; a body that is not a
    /// JSON array yields an empty set.
    pub fn parse(body: &[u8]) -> Self {
        let entries: Vec<Value> = match serde_json::from_slice(body) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(error = %err, "Governance rules body is not a JSON array");
                return Self::default();
            }
        };

        Self::new(entries.into_iter().filter_map(|entry| {
            serde_json::from_value::<GovernanceRule>(entry)
                .map_err(|err| tracing::debug!(error = %err, "Skipping malformed governance rule"))
                .ok()
        }))
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.regex.len() + self.user.len() + self.company.len()
    }

    /// Whether there are no rules at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
