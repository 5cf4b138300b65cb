use tiktoken_rs::{CoreBPE, tokenizer::Tokenizer};

/// Models the chat endpoint accepts, each with the encoding its family uses.
/// Unknown models fall back to `cl100k_base`.
const MODEL_ENCODINGS: &[(&str, Tokenizer)] = &[
    ("gpt-4o", Tokenizer::O200kBase),
    ("gpt-o1", Tokenizer::O200kBase),
    ("gpt-4", Tokenizer::Cl100kBase),
    ("gpt-4-0314", Tokenizer::Cl100kBase),
    ("gpt-4-0613", Tokenizer::Cl100kBase),
    ("gpt-4-32k", Tokenizer::Cl100kBase),
    ("gpt-4-32k-0314", Tokenizer::Cl100kBase),
    ("gpt-4-32k-0613", Tokenizer::Cl100kBase),
    ("gpt-3.5-turbo", Tokenizer::Cl100kBase),
    ("gpt-3.5-turbo-0301", Tokenizer::Cl100kBase),
    ("gpt-3.5-turbo-0613", Tokenizer::Cl100kBase),
    ("gpt-3.5-turbo-16k", Tokenizer::Cl100kBase),
    ("gpt-3.5-turbo-16k-0613", Tokenizer::Cl100kBase),
    ("text-davinci-003", Tokenizer::P50kBase),
    ("text-davinci-002", Tokenizer::P50kBase),
    ("text-curie-001", Tokenizer::P50kBase),
    ("text-babbage-001", Tokenizer::P50kBase),
    ("text-ada-001", Tokenizer::P50kBase),
    ("davinci", Tokenizer::P50kBase),
    ("curie", Tokenizer::P50kBase),
    ("babbage", Tokenizer::P50kBase),
    ("ada", Tokenizer::P50kBase),
    ("whisper-1", Tokenizer::Cl100kBase),
];

pub fn is_known_model(model: &str) -> bool {
    MODEL_ENCODINGS.iter().any(|(name, _)| *name == model)
}

/// Shared text encoder, constructed once and injected into the estimator.
/// Holds no per-request state; counting is deterministic.
pub struct TextEncoder {
    default_bpe: &'static CoreBPE,
}

impl TextEncoder {
    pub fn new() -> Self {
        Self {
            default_bpe: singleton_for(&Tokenizer::Cl100kBase),
        }
    }

    /// Token count under the default encoding. Empty text is zero tokens.
    pub fn count(&self, text: &str) -> u64 {
        clamp_usize_to_u64(self.default_bpe.encode_with_special_tokens(text).len())
    }

    /// Token count under the model's encoding, falling back to the default
    /// for absent or unknown models.
    pub fn count_for_model(&self, model: Option<&str>, text: &str) -> u64 {
        let bpe = model
            .and_then(encoding_for_model)
            .unwrap_or(self.default_bpe);
        clamp_usize_to_u64(bpe.encode_with_special_tokens(text).len())
    }
}

impl Default for TextEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encoding_for_model(model: &str) -> Option<&'static CoreBPE> {
    MODEL_ENCODINGS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, tokenizer)| singleton_for(tokenizer))
}

fn singleton_for(tokenizer: &Tokenizer) -> &'static CoreBPE {
    match tokenizer {
        Tokenizer::O200kHarmony => tiktoken_rs::o200k_harmony_singleton(),
        Tokenizer::O200kBase => tiktoken_rs::o200k_base_singleton(),
        Tokenizer::Cl100kBase => tiktoken_rs::cl100k_base_singleton(),
        Tokenizer::R50kBase | Tokenizer::Gpt2 => tiktoken_rs::r50k_base_singleton(),
        Tokenizer::P50kBase => tiktoken_rs::p50k_base_singleton(),
        Tokenizer::P50kEdit => tiktoken_rs::p50k_edit_singleton(),
    }
}

fn clamp_usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
