use serde_json::Value;

use crate::token_count::TextEncoder;

/// Token cost of a single 256x256 generation; every other image price is a
/// multiple of this.
pub const IMAGE_BASE_COST: u64 = 1000;

const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOperation {
    Generation,
    Edit,
    Variation,
}

impl ImageOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Edit => "edit",
            Self::Variation => "variation",
        }
    }
}

/// Pre-flight cost estimate. The breakdown exists for observability only and
/// is never persisted as authoritative usage.
#[derive(Clone, Debug)]
pub struct CostEstimate {
    pub total_tokens: u64,
    pub breakdown: Option<ImageBreakdown>,
}

#[derive(Clone, Debug)]
pub struct ImageBreakdown {
    pub base_cost: u64,
    pub num_images: u64,
    pub prompt_cost: u64,
    pub size: String,
    pub operation: ImageOperation,
}

pub fn is_image_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("/images")
}

/// Estimated token cost for an endpoint + request body.
///
/// Text families carry a 10% safety margin, rounded up. Image estimates do
/// not: their multiplier table already overshoots real cost. Callers depend
/// on this asymmetry for budget math.
pub fn estimate(encoder: &TextEncoder, endpoint: &str, body: &Value) -> CostEstimate {
    if is_image_endpoint(endpoint) {
        return image_cost(encoder, body);
    }

    let model = body.get("model").and_then(Value::as_str);
    let prompt_tokens = match endpoint {
        "/chat/completions" => chat_message_tokens(encoder, model, body),
        "/completions" => string_or_array_tokens(encoder, model, body.get("prompt")),
        "/moderations" => string_or_array_tokens(encoder, model, body.get("input")),
        // Batches, files and the rest are not token-metered.
        _ => {
            return CostEstimate {
                total_tokens: 0,
                breakdown: None,
            };
        }
    };

    CostEstimate {
        total_tokens: with_safety_margin(prompt_tokens),
        breakdown: None,
    }
}

/// Image-family cost. Also used by the usage recorder after the fact: the
/// upstream reports no token usage for image calls.
pub fn image_cost(encoder: &TextEncoder, body: &Value) -> CostEstimate {
    let num_images = body.get("n").and_then(Value::as_u64).unwrap_or(1);
    let size = body
        .get("size")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_IMAGE_SIZE);
    let prompt = body.get("prompt").and_then(Value::as_str).unwrap_or("");

    let has_source_image = body.get("image").is_some();
    let operation = if has_source_image && body.get("variations").is_some() {
        ImageOperation::Variation
    } else if has_source_image && body.get("mask").is_some() {
        ImageOperation::Edit
    } else {
        ImageOperation::Generation
    };

    let base_cost = adjust_for_operation(adjust_for_resolution(IMAGE_BASE_COST, size), operation);
    let prompt_cost = encoder.count(prompt);
    let total_tokens = base_cost
        .saturating_mul(num_images)
        .saturating_add(prompt_cost);

    CostEstimate {
        total_tokens,
        breakdown: Some(ImageBreakdown {
            base_cost,
            num_images,
            prompt_cost,
            size: size.to_string(),
            operation,
        }),
    }
}

fn adjust_for_resolution(base_cost: u64, size: &str) -> u64 {
    match size {
        "256x256" => base_cost,
        "512x512" => base_cost.saturating_mul(2),
        "1024x1024" => base_cost.saturating_mul(4),
        "1792x1024" | "1024x1792" => base_cost.saturating_mul(6),
        _ => base_cost,
    }
}

fn adjust_for_operation(base_cost: u64, operation: ImageOperation) -> u64 {
    match operation {
        ImageOperation::Variation => base_cost / 2,
        ImageOperation::Edit => base_cost.saturating_mul(3) / 4,
        ImageOperation::Generation => base_cost,
    }
}

fn chat_message_tokens(encoder: &TextEncoder, model: Option<&str>, body: &Value) -> u64 {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return 0;
    };
    messages
        .iter()
        .filter_map(|message| message.get("content").and_then(Value::as_str))
        .map(|content| encoder.count_for_model(model, content))
        .fold(0u64, u64::saturating_add)
}

fn string_or_array_tokens(encoder: &TextEncoder, model: Option<&str>, value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(text)) => encoder.count_for_model(model, text),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|text| encoder.count_for_model(model, text))
            .fold(0u64, u64::saturating_add),
        _ => 0,
    }
}

/// ceil(tokens * 1.1) in integer arithmetic.
fn with_safety_margin(tokens: u64) -> u64 {
    tokens.saturating_mul(11).saturating_add(9) / 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoder() -> TextEncoder {
        TextEncoder::new()
    }

    #[test]
    fn smallest_generation_costs_exactly_base() {
        let estimate = estimate(
            &encoder(),
            "/images/generations",
            &json!({"size": "256x256", "n": 1, "prompt": ""}),
        );
        assert_eq!(estimate.total_tokens, IMAGE_BASE_COST);
    }

    #[test]
    fn large_generation_scales_by_resolution_and_count() {
        let estimate = estimate(
            &encoder(),
            "/images/generations",
            &json!({"size": "1024x1024", "n": 2, "prompt": ""}),
        );
        assert_eq!(estimate.total_tokens, 8000);
    }

    #[test]
    fn variation_halves_the_resolution_adjusted_base() {
        let estimate = estimate(
            &encoder(),
            "/images/variations",
            &json!({"size": "512x512", "image": "...", "variations": 1, "prompt": ""}),
        );
        assert_eq!(estimate.total_tokens, 1000);
        let breakdown = estimate.breakdown.expect("image breakdown");
        assert_eq!(breakdown.operation, ImageOperation::Variation);
    }

    #[test]
    fn edit_costs_three_quarters_of_the_adjusted_base() {
        let estimate = estimate(
            &encoder(),
            "/images/edits",
            &json!({"size": "512x512", "image": "...", "mask": "...", "prompt": ""}),
        );
        assert_eq!(estimate.total_tokens, 1500);
    }

    #[test]
    fn variation_check_wins_when_both_flags_are_present() {
        let estimate = image_cost(
            &encoder(),
            &json!({"size": "256x256", "image": "...", "variations": 1, "mask": "..."}),
        );
        let breakdown = estimate.breakdown.expect("image breakdown");
        assert_eq!(breakdown.operation, ImageOperation::Variation);
        assert_eq!(estimate.total_tokens, 500);
    }

    #[test]
    fn image_defaults_are_largest_square_and_one_image() {
        let estimate = estimate(&encoder(), "/images/generations", &json!({"prompt": ""}));
        assert_eq!(estimate.total_tokens, 4000);
        let breakdown = estimate.breakdown.expect("image breakdown");
        assert_eq!(breakdown.size, "1024x1024");
        assert_eq!(breakdown.num_images, 1);
    }

    #[test]
    fn unrecognized_size_keeps_the_base_cost() {
        let estimate = estimate(
            &encoder(),
            "/images/generations",
            &json!({"size": "640x480", "prompt": ""}),
        );
        assert_eq!(estimate.total_tokens, IMAGE_BASE_COST);
    }

    #[test]
    fn image_estimate_is_not_margin_adjusted() {
        // The 10% margin applies to text families only; the image multiplier
        // table already embeds its own conservatism.
        let empty_prompt = estimate(
            &encoder(),
            "/images/generations",
            &json!({"size": "256x256", "n": 1, "prompt": ""}),
        );
        assert_eq!(empty_prompt.total_tokens % 1000, 0);
    }

    #[test]
    fn text_estimate_carries_ten_percent_margin_rounded_up() {
        let enc = encoder();
        let raw = enc.count("hello world");
        let estimate = estimate(&enc, "/completions", &json!({"prompt": "hello world"}));
        assert_eq!(estimate.total_tokens, (raw * 11).div_ceil(10));
    }

    #[test]
    fn chat_estimate_sums_message_contents() {
        let enc = encoder();
        let single = estimate(
            &enc,
            "/chat/completions",
            &json!({"messages": [{"role": "user", "content": "hello"}]}),
        );
        let double = estimate(
            &enc,
            "/chat/completions",
            &json!({"messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hello there, how can I help?"}
            ]}),
        );
        assert!(double.total_tokens > single.total_tokens);
    }

    #[test]
    fn estimate_is_monotonic_in_prompt_count_and_length() {
        let enc = encoder();
        let short = estimate(&enc, "/completions", &json!({"prompt": "hi"}));
        let long = estimate(
            &enc,
            "/completions",
            &json!({"prompt": "hi there, this prompt is quite a bit longer"}),
        );
        let many = estimate(
            &enc,
            "/completions",
            &json!({"prompt": ["hi there, this prompt is quite a bit longer", "and another one"]}),
        );
        assert!(short.total_tokens <= long.total_tokens);
        assert!(long.total_tokens <= many.total_tokens);
    }

    #[test]
    fn moderation_input_accepts_string_or_array() {
        let enc = encoder();
        let single = estimate(&enc, "/moderations", &json!({"input": "check this"}));
        let list = estimate(
            &enc,
            "/moderations",
            &json!({"input": ["check this", "and this"]}),
        );
        assert!(single.total_tokens > 0);
        assert!(list.total_tokens > single.total_tokens);
    }

    #[test]
    fn missing_fields_estimate_zero() {
        let enc = encoder();
        assert_eq!(
            estimate(&enc, "/chat/completions", &json!({})).total_tokens,
            0
        );
        assert_eq!(estimate(&enc, "/completions", &json!({})).total_tokens, 0);
        assert_eq!(estimate(&enc, "/moderations", &json!({})).total_tokens, 0);
    }

    #[test]
    fn unmetered_endpoints_estimate_zero() {
        let enc = encoder();
        assert_eq!(
            estimate(&enc, "/batches", &json!({"input_file_id": "file-1"})).total_tokens,
            0
        );
        assert_eq!(estimate(&enc, "/files", &json!({})).total_tokens, 0);
    }
}
