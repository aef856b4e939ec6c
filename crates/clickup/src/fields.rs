//! Custom field value handling.
//!
//! ClickUp is loose about dropdown values: depending on the endpoint and
//! workspace, a dropdown's value arrives as an orderindex number, an option
//! object, an option ID string, or an option name. The update endpoint only
//! accepts option IDs, so everything funnels through
//! [`resolve_dropdown_option`] before a write. Currency amounts are handled
//! as integer cents so repeated aggregation never drifts.

use serde_json::Value;

use crate::model::CustomField;

/// Format a field value for the update endpoint.
///
/// - `null` becomes an empty string (ClickUp clears the field).
/// - checkbox values become the strings `"true"` / `"false"`.
/// - dropdown option objects collapse to their option ID.
/// - everything else passes through unchanged.
pub fn format_field_value(value: &Value, field_type: &str) -> Value {
    if value.is_null() {
        return Value::String(String::new());
    }
    if field_type == "checkbox" {
        let checked = value.as_bool().unwrap_or(false);
        return Value::String(checked.to_string());
    }
    if field_type == "drop_down" {
        if let Some(id) = value.get("id").and_then(Value::as_str) {
            return Value::String(id.to_string());
        }
    }
    value.clone()
}

/// Resolve a dropdown field's raw value to the selected option's ID.
///
/// Tries, in order: orderindex match (numeric values), the embedded `id` of
/// an option object, a direct option-ID match, and finally an option-name
/// match. Returns `None` when the value matches no configured option.
pub fn resolve_dropdown_option(field: &CustomField, value: &Value) -> Option<String> {
    let options = field.options();

    if let Some(index) = value.as_i64() {
        return options
            .iter()
            .find(|opt| opt.orderindex == Some(index))
            .map(|opt| opt.id.clone());
    }

    if let Some(id) = value.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }

    if let Some(s) = value.as_str() {
        if let Some(opt) = options.iter().find(|opt| opt.id == s) {
            return Some(opt.id.clone());
        }
        return options
            .iter()
            .find(|opt| opt.name == s)
            .map(|opt| opt.id.clone());
    }

    None
}

/// Parse a currency value into integer cents.
///
/// Accepts numbers and numeric strings; `null`, empty, and unparseable
/// values count as zero, matching how absent costs are aggregated.
pub fn currency_cents(value: &Value) -> i64 {
    let amount = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    amount.map(|a| (a * 100.0).round() as i64).unwrap_or(0)
}

/// Format integer cents back into a two-decimal currency string.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
