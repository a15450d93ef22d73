//! Request validation and sanitization
//!
//! Rejects malformed, oversized, or unsafe requests before they reach any
//! network layer, and returns a sanitized copy with HTML tags stripped from
//! identifier and prompt fields. Validation is idempotent: validating the
//! sanitized output of a valid request yields the same result.

use coscient_core::{AgentType, LlmRequest, RequestType, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 100_000;
/// Maximum serialized context size in bytes.
pub const MAX_CONTEXT_SIZE: usize = 1_000_000;
/// Maximum serialized request size in bytes.
pub const MAX_REQUEST_SIZE: usize = 5_000_000;
/// Maximum allowed token/character output limit.
pub const MAX_LENGTH_LIMIT: u64 = 1_000_000;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid literal regex"));

/// Strip HTML/script tags from a string field.
pub fn sanitize_text(s: &str) -> String {
    HTML_TAG.replace_all(s, "").into_owned()
}

// ============================================================================
// PARAMETER VALIDATION
// ============================================================================

fn validate_temperature(value: &Value) -> Result<(), ValidationError> {
    let t = value.as_f64().ok_or_else(|| ValidationError::InvalidValue {
        field: "temperature".to_string(),
        reason: "temperature must be numeric".to_string(),
    })?;
    if !(0.0..=1.0).contains(&t) {
        return Err(ValidationError::InvalidValue {
            field: "temperature".to_string(),
            reason: format!("temperature must be between 0.0 and 1.0, got {t}"),
        });
    }
    Ok(())
}

fn validate_max_length(value: &Value) -> Result<(), ValidationError> {
    let n = value.as_u64().ok_or_else(|| ValidationError::InvalidValue {
        field: "max_length".to_string(),
        reason: "max_length must be a positive integer".to_string(),
    })?;
    if n == 0 {
        return Err(ValidationError::InvalidValue {
            field: "max_length".to_string(),
            reason: "max_length must be positive".to_string(),
        });
    }
    if n > MAX_LENGTH_LIMIT {
        return Err(ValidationError::InvalidValue {
            field: "max_length".to_string(),
            reason: format!("max_length exceeds limit of {MAX_LENGTH_LIMIT}, got {n}"),
        });
    }
    Ok(())
}

fn validate_response_format(value: &Value) -> Result<(), ValidationError> {
    let format = value.as_str().unwrap_or("");
    if !matches!(format, "text" | "structured" | "list") {
        return Err(ValidationError::InvalidValue {
            field: "response_format".to_string(),
            reason: format!("response_format must be one of text/structured/list, got {value}"),
        });
    }
    Ok(())
}

/// Validate the known request parameters, ignoring unknown keys.
pub fn validate_parameters(parameters: &Map<String, Value>) -> Result<(), ValidationError> {
    if let Some(value) = parameters.get("temperature") {
        validate_temperature(value)?;
    }
    if let Some(value) = parameters.get("max_length") {
        validate_max_length(value)?;
    }
    if let Some(value) = parameters.get("response_format") {
        validate_response_format(value)?;
    }
    Ok(())
}

// ============================================================================
// CONTENT VALIDATION
// ============================================================================

fn validate_prompt(prompt: &str) -> Result<(), ValidationError> {
    if prompt.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "prompt".to_string(),
            reason: "prompt cannot be empty".to_string(),
        });
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(ValidationError::SizeExceeded {
            field: "prompt".to_string(),
            size: len,
            limit: MAX_PROMPT_LENGTH,
        });
    }
    Ok(())
}

fn validate_context(context: &Map<String, Value>) -> Result<(), ValidationError> {
    let serialized = serde_json::to_string(context).map_err(|e| ValidationError::InvalidValue {
        field: "context".to_string(),
        reason: e.to_string(),
    })?;
    if serialized.len() > MAX_CONTEXT_SIZE {
        return Err(ValidationError::SizeExceeded {
            field: "context".to_string(),
            size: serialized.len(),
            limit: MAX_CONTEXT_SIZE,
        });
    }
    Ok(())
}

// ============================================================================
// REQUEST VALIDATION
// ============================================================================

fn require<'a>(request: &'a Map<String, Value>, field: &str) -> Result<&'a Value, ValidationError> {
    request.get(field).ok_or_else(|| ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    })
}

fn require_str<'a>(request: &'a Map<String, Value>, field: &str) -> Result<&'a str, ValidationError> {
    require(request, field)?.as_str().ok_or_else(|| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: "must be a string".to_string(),
    })
}

fn require_object<'a>(
    map: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    require(map, field)?.as_object().ok_or_else(|| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: "must be an object".to_string(),
    })
}

/// Validate and sanitize a raw request value.
///
/// Returns a sanitized copy on success. All failures surface as
/// `invalid_request` (non-recoverable) at the gateway boundary.
pub fn validate_request(request: &Value) -> Result<Value, ValidationError> {
    let map = request.as_object().ok_or_else(|| ValidationError::InvalidValue {
        field: "request".to_string(),
        reason: "request must be an object".to_string(),
    })?;

    // Total request size first, so oversized payloads are rejected before
    // any per-field work.
    let serialized = serde_json::to_string(request).map_err(|e| ValidationError::InvalidValue {
        field: "request".to_string(),
        reason: e.to_string(),
    })?;
    if serialized.len() > MAX_REQUEST_SIZE {
        return Err(ValidationError::SizeExceeded {
            field: "request".to_string(),
            size: serialized.len(),
            limit: MAX_REQUEST_SIZE,
        });
    }

    let request_id = require_str(map, "request_id")?;
    let agent_type = require_str(map, "agent_type")?;
    let request_type = require_str(map, "request_type")?;
    let content = require_object(map, "content")?;

    AgentType::from_str(agent_type).map_err(|e| ValidationError::InvalidValue {
        field: "agent_type".to_string(),
        reason: e.to_string(),
    })?;
    RequestType::from_str(request_type).map_err(|e| ValidationError::InvalidValue {
        field: "request_type".to_string(),
        reason: e.to_string(),
    })?;

    let prompt = require_str(content, "prompt")?;
    let context = require_object(content, "context")?;
    let parameters = require_object(content, "parameters")?;

    validate_prompt(prompt)?;
    validate_context(context)?;
    validate_parameters(parameters)?;

    // Sanitized copy: HTML tags stripped from identifier and prompt fields.
    let mut sanitized = map.clone();
    sanitized.insert("request_id".to_string(), Value::from(sanitize_text(request_id)));
    if let Some(content) = sanitized.get_mut("content").and_then(Value::as_object_mut) {
        content.insert("prompt".to_string(), Value::from(sanitize_text(prompt)));
    }

    Ok(Value::Object(sanitized))
}

/// Validate a typed request, returning a sanitized copy.
pub fn validate_llm_request(request: &LlmRequest) -> Result<LlmRequest, ValidationError> {
    let value = serde_json::to_value(request).map_err(|e| ValidationError::InvalidValue {
        field: "request".to_string(),
        reason: e.to_string(),
    })?;
    let sanitized = validate_request(&value)?;
    serde_json::from_value(sanitized).map_err(|e| ValidationError::InvalidValue {
        field: "request".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_request() -> Value {
        json!({
            "request_id": "req-001",
            "agent_type": "generation",
            "request_type": "generate",
            "content": {
                "prompt": "Propose a hypothesis",
                "context": {"goal": "test"},
                "parameters": {"temperature": 0.7, "max_length": 1000}
            }
        })
    }

    #[test]
    fn accepts_a_valid_request() {
        assert!(validate_request(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_missing_fields() {
        let mut req = valid_request();
        req.as_object_mut().unwrap().remove("agent_type");
        assert!(matches!(
            validate_request(&req),
            Err(ValidationError::RequiredFieldMissing { field }) if field == "agent_type"
        ));
    }

    #[test]
    fn rejects_unknown_agent_type() {
        let mut req = valid_request();
        req["agent_type"] = json!("wizard");
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_empty_prompt() {
        let mut req = valid_request();
        req["content"]["prompt"] = json!("   ");
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_oversized_prompt() {
        let mut req = valid_request();
        req["content"]["prompt"] = json!("x".repeat(MAX_PROMPT_LENGTH + 1));
        assert!(matches!(
            validate_request(&req),
            Err(ValidationError::SizeExceeded { field, .. }) if field == "prompt"
        ));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut req = valid_request();
        req["content"]["parameters"]["temperature"] = json!(1.5);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_bad_response_format() {
        let mut req = valid_request();
        req["content"]["parameters"]["response_format"] = json!("xml");
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn strips_html_from_identifier_and_prompt() {
        let mut req = valid_request();
        req["request_id"] = json!("req-<script>alert(1)</script>1");
        req["content"]["prompt"] = json!("Hello <b>world</b>");
        let sanitized = validate_request(&req).unwrap();
        assert_eq!(sanitized["request_id"], json!("req-alert(1)1"));
        assert_eq!(sanitized["content"]["prompt"], json!("Hello world"));
    }

    #[test]
    fn validation_is_idempotent() {
        let mut req = valid_request();
        req["content"]["prompt"] = json!("Hello <b>world</b>");
        let once = validate_request(&req).unwrap();
        let twice = validate_request(&once).unwrap();
        assert_eq!(once, twice);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(50))]

            #[test]
            fn sanitize_never_leaves_tags(s in ".{0,200}") {
                let cleaned = sanitize_text(&s);
                prop_assert!(!HTML_TAG.is_match(&cleaned));
            }

            #[test]
            fn temperature_in_unit_interval_is_accepted(t in 0.0f64..=1.0) {
                let mut req = valid_request();
                req["content"]["parameters"]["temperature"] = json!(t);
                prop_assert!(validate_request(&req).is_ok());
            }
        }
    }
}
