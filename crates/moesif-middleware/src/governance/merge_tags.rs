//! `{{name}}` placeholder substitution.

use serde_json::Value;
use std::collections::HashMap;

/// Text substituted for a placeholder with no value.
pub const UNKNOWN: &str = "UNKNOWN";

/// Replace every `{{name}}` in `template`.
pub fn render_str(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = rest[open + 2..open + 2 + close].trim();
        out.push_str(values.get(name).map(String::as_str).unwrap_or(UNKNOWN));
        rest = &rest[open + 2 + close + 2..];
    }

    out.push_str(rest);
    out
}

/// Substitute placeholders in every string of a JSON tree.
///
/// Object keys are left alone.
pub fn render(value: &Value, values: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(render_str(s, values)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, values)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, values)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> HashMap<String, String> {
        HashMap::from([
            ("plan".to_string(), "free".to_string()),
            ("limit".to_string(), "100".to_string()),
        ])
    }

    #[test]
    fn placeholders_are_replaced() {
        assert_eq!(
            render_str("Plan {{plan}} allows {{ limit }} calls", &values()),
            "Plan free allows 100 calls"
        );
    }

    #[test]
    fn unknown_names_render_unknown() {
        assert_eq!(render_str("hi {{who}}", &values()), "hi UNKNOWN");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(render_str("open {{plan", &values()), "open {{plan");
    }

    #[test]
    fn nested_structures_are_walked() {
        let body = json!({
            "error": {"message": "Upgrade from {{plan}}", "codes": ["{{limit}}", 7, null]},
            "{{plan}}": true
        });
        assert_eq!(
            render(&body, &values()),
            json!({
                "error": {"message": "Upgrade from free", "codes": ["100", 7, null]},
                "{{plan}}": true
            })
        );
    }
}
