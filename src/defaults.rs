//! Bundled fallback schema and format template.
//!
//! A trigger payload may carry empty `target_schema` / `format_template`
//! values; the orchestrator then falls back to the defaults here so a bare
//! request (container + filename + model) is enough to run the pipeline
//! end-to-end. Centralising the fallbacks in one module keeps them
//! unit-testable and easy to swap without touching the state machine.

use serde_json::{json, Value};

/// The default target schema the Analyst extracts towards and the Reviewer
/// evaluates against: a general business-document shape (header fields plus
/// line items) that covers invoices, purchase orders, and delivery notes.
pub fn default_target_schema() -> Value {
    json!({
        "document_type": "string — classification of the source document",
        "document_date": "string — ISO 8601 date",
        "reference_number": "string — invoice / order / document number",
        "issuer": {
            "name": "string",
            "address": "string"
        },
        "recipient": {
            "name": "string",
            "address": "string"
        },
        "line_items": [
            {
                "description": "string",
                "quantity": "number",
                "unit_price": "number",
                "amount": "number"
            }
        ],
        "subtotal": "number",
        "tax": "number",
        "total": "number",
        "notes": "string — anything present on the document that fits no other field"
    })
}

/// The default output template handed to the Formatter: field name → expected
/// output type, flattened for downstream consumers.
pub fn default_format_template() -> Value {
    json!({
        "document_type": "string",
        "document_date": "date",
        "reference_number": "string",
        "issuer_name": "string",
        "issuer_address": "string",
        "recipient_name": "string",
        "recipient_address": "string",
        "line_items": "array",
        "subtotal": "currency",
        "tax": "currency",
        "total": "currency",
        "notes": "string"
    })
}

/// True when a payload value should trigger the bundled fallback: JSON null,
/// an empty object, or an empty string.
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Resolve the effective target schema for a request.
pub fn resolve_target_schema(requested: &Value) -> Value {
    if is_unset(requested) {
        default_target_schema()
    } else {
        requested.clone()
    }
}

/// Resolve the effective format template for a request.
pub fn resolve_format_template(requested: &Value) -> Value {
    if is_unset(requested) {
        default_format_template()
    } else {
        requested.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_fall_back_to_defaults() {
        assert_eq!(resolve_target_schema(&Value::Null), default_target_schema());
        assert_eq!(
            resolve_target_schema(&json!({})),
            default_target_schema()
        );
        assert_eq!(
            resolve_format_template(&json!("")),
            default_format_template()
        );
    }

    #[test]
    fn explicit_schema_is_passed_through() {
        let custom = json!({"serial_number": "string"});
        assert_eq!(resolve_target_schema(&custom), custom);
        assert_eq!(resolve_format_template(&custom), custom);
    }

    #[test]
    fn defaults_are_non_empty_objects() {
        assert!(!default_target_schema().as_object().unwrap().is_empty());
        assert!(!default_format_template().as_object().unwrap().is_empty());
    }
}
