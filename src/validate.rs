use serde_json::Value;

use crate::error::FieldErrors;
use crate::token_count;

const ALLOWED_IMAGE_SIZES: &[&str] = &[
    "256x256",
    "512x512",
    "1024x1024",
    "1792x1024",
    "1024x1792",
];
const ALLOWED_IMAGE_QUALITIES: &[&str] = &["standard", "hd"];
const ALLOWED_MESSAGE_ROLES: &[&str] = &["system", "user", "assistant"];
const MAX_IMAGE_PROMPT_CHARS: usize = 4000;
const MAX_IMAGES_PER_REQUEST: u64 = 10;

/// Shape checks for the endpoints that carry a structured body. Endpoints
/// without rules pass unchecked; their payloads are the upstream's problem.
pub fn validate_request(endpoint: &str, body: &Value) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    match endpoint {
        "/chat/completions" => validate_chat(body, &mut errors),
        "/completions" => validate_completions(body, &mut errors),
        "/images/generations" => validate_image_generation(body, &mut errors),
        _ => {}
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn push(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

fn validate_chat(body: &Value, errors: &mut FieldErrors) {
    match body.get("messages").and_then(Value::as_array) {
        Some(messages) if !messages.is_empty() => {
            for (index, message) in messages.iter().enumerate() {
                let role = message.get("role").and_then(Value::as_str);
                if !role.is_some_and(|role| ALLOWED_MESSAGE_ROLES.contains(&role)) {
                    push(
                        errors,
                        &format!("messages.{index}.role"),
                        "role must be one of: system, user, assistant",
                    );
                }
                if message.get("content").and_then(Value::as_str).is_none() {
                    push(
                        errors,
                        &format!("messages.{index}.content"),
                        "content must be a string",
                    );
                }
            }
        }
        _ => push(errors, "messages", "messages must be a non-empty array"),
    }

    match body.get("model").and_then(Value::as_str) {
        Some(model) if token_count::is_known_model(model) => {}
        Some(_) => push(errors, "model", "unsupported model"),
        None => push(errors, "model", "model is required"),
    }
}

fn validate_completions(body: &Value, errors: &mut FieldErrors) {
    match body.get("prompt") {
        Some(Value::String(_)) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => push(errors, "prompt", "prompt must be a string or an array of strings"),
        None => push(errors, "prompt", "prompt is required"),
    }
}

fn validate_image_generation(body: &Value, errors: &mut FieldErrors) {
    match body.get("prompt").and_then(Value::as_str) {
        Some(prompt) if prompt.chars().count() <= MAX_IMAGE_PROMPT_CHARS => {}
        Some(_) => push(errors, "prompt", "prompt must be at most 4000 characters"),
        None => push(errors, "prompt", "prompt is required"),
    }

    if let Some(size) = body.get("size") {
        if !size
            .as_str()
            .is_some_and(|size| ALLOWED_IMAGE_SIZES.contains(&size))
        {
            push(errors, "size", "unsupported size");
        }
    }

    if let Some(quality) = body.get("quality") {
        if !quality
            .as_str()
            .is_some_and(|quality| ALLOWED_IMAGE_QUALITIES.contains(&quality))
        {
            push(errors, "quality", "quality must be standard or hd");
        }
    }

    if let Some(n) = body.get("n") {
        if !n
            .as_u64()
            .is_some_and(|n| (1..=MAX_IMAGES_PER_REQUEST).contains(&n))
        {
            push(errors, "n", "n must be an integer between 1 and 10");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_chat_request_passes() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hello"}],
        });
        assert!(validate_request("/chat/completions", &body).is_ok());
    }

    #[test]
    fn chat_request_reports_each_offending_field() {
        let body = json!({
            "model": "gpt-99-ultra",
            "messages": [{"role": "robot", "content": 5}],
        });
        let errors = validate_request("/chat/completions", &body).expect_err("invalid");
        assert!(errors.contains_key("model"));
        assert!(errors.contains_key("messages.0.role"));
        assert!(errors.contains_key("messages.0.content"));
    }

    #[test]
    fn chat_request_requires_messages_and_model() {
        let errors = validate_request("/chat/completions", &json!({})).expect_err("invalid");
        assert!(errors.contains_key("messages"));
        assert!(errors.contains_key("model"));
    }

    #[test]
    fn completions_prompt_may_be_string_or_string_array() {
        assert!(validate_request("/completions", &json!({"prompt": "hi"})).is_ok());
        assert!(validate_request("/completions", &json!({"prompt": ["a", "b"]})).is_ok());
        assert!(validate_request("/completions", &json!({"prompt": [1, 2]})).is_err());
        assert!(validate_request("/completions", &json!({})).is_err());
    }

    #[test]
    fn image_generation_enforces_size_quality_and_count() {
        let body = json!({
            "prompt": "a lighthouse",
            "size": "640x480",
            "quality": "ultra",
            "n": 11,
        });
        let errors = validate_request("/images/generations", &body).expect_err("invalid");
        assert!(errors.contains_key("size"));
        assert!(errors.contains_key("quality"));
        assert!(errors.contains_key("n"));
    }

    #[test]
    fn image_generation_caps_prompt_length() {
        let body = json!({"prompt": "x".repeat(4001)});
        assert!(validate_request("/images/generations", &body).is_err());
        let body = json!({"prompt": "x".repeat(4000)});
        assert!(validate_request("/images/generations", &body).is_ok());
    }

    #[test]
    fn unlisted_endpoints_pass_any_shape() {
        assert!(validate_request("/batches", &json!({"whatever": true})).is_ok());
        assert!(validate_request("/moderations", &json!({})).is_ok());
        assert!(validate_request("/images/variations", &json!({})).is_ok());
    }
}
