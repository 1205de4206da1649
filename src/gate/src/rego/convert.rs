//! Value conversion between serde_json::Value and regorus values

use anyhow::Context;
use regorus::Value as RegoValue;
use serde_json::Value as JsonValue;

use crate::BindingMap;

/// Convert a binding map into the policy `input` document
pub fn bindings_to_input(bindings: &BindingMap) -> anyhow::Result<RegoValue> {
    let json = serde_json::to_string(bindings).context("serializing bindings")?;
    RegoValue::from_json_str(&json).context("converting bindings to policy input")
}

/// Convert a regorus value to serde_json::Value
///
/// Sets become arrays. `Undefined` has no JSON form and maps to `None`.
pub fn rego_to_json(value: &RegoValue) -> Option<JsonValue> {
    if matches!(value, RegoValue::Undefined) {
        return None;
    }
    value
        .to_json_str()
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

/// Render a value for diagnostics
pub fn describe(value: &RegoValue) -> String {
    match rego_to_json(value) {
        Some(json) => json.to_string(),
        None => "undefined".to_string(),
    }
}
