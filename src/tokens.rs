//! Token estimation.
//!
//! Known models map to a named tiktoken encoder; unknown models share the
//! default encoder. If an encoder is unavailable at runtime the estimate
//! degrades to a word-count heuristic.

use once_cell::sync::Lazy;
use serde_json::Value;
use tiktoken_rs::CoreBPE;

/// Per-message overhead tokens charged by chat completion APIs.
const TOKENS_PER_MESSAGE: i64 = 4;
/// Every reply is primed with an assistant header.
const TOKENS_REPLY_OVERHEAD: i64 = 3;

static O200K: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::o200k_base().ok());
static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

fn encoder_for(model: &str) -> &'static Option<CoreBPE> {
    // gpt-4o family uses o200k; older OpenAI chat models and everything
    // without its own tokenizer approximate with cl100k.
    if model.starts_with("gpt-4o") {
        &O200K
    } else {
        &CL100K
    }
}

/// Count tokens in `text` for `model`, falling back to `⌊1.3 · words⌋` when
/// the encoder cannot be loaded.
pub fn count(text: &str, model: &str) -> i64 {
    match encoder_for(model) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as i64,
        None => heuristic(text),
    }
}

fn heuristic(text: &str) -> i64 {
    (text.split_whitespace().count() as f64 * 1.3) as i64
}

/// Count tokens for a chat message list, including per-message and reply
/// overheads. Every string field is counted; a `name` field subtracts one.
pub fn count_messages(messages: &[Value], model: &str) -> i64 {
    let mut total = TOKENS_REPLY_OVERHEAD;
    for msg in messages {
        total += TOKENS_PER_MESSAGE;
        if let Some(obj) = msg.as_object() {
            for (key, value) in obj {
                if let Some(s) = value.as_str() {
                    total += count(s, model);
                }
                if key == "name" {
                    total -= 1;
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_are_positive_for_nonempty_text() {
        assert!(count("What is 2+2?", "gpt-4o") > 0);
        assert!(count("hello world", "some-unknown-model") > 0);
    }

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count("", "gpt-4o"), 0);
    }

    #[test]
    fn heuristic_floors_word_count() {
        assert_eq!(heuristic("one two three"), 3); // 3 * 1.3 = 3.9
        assert_eq!(heuristic(""), 0);
    }

    #[test]
    fn message_overhead_applied() {
        let messages = vec![json!({"role": "user", "content": "hi"})];
        let total = count_messages(&messages, "gpt-4o");
        let content = count("hi", "gpt-4o") + count("user", "gpt-4o");
        assert_eq!(total, TOKENS_REPLY_OVERHEAD + TOKENS_PER_MESSAGE + content);
    }

    #[test]
    fn name_field_subtracts_one() {
        let without = count_messages(&[json!({"role": "user", "content": "hi"})], "gpt-4o");
        let with = count_messages(
            &[json!({"role": "user", "content": "hi", "name": ""})],
            "gpt-4o",
        );
        assert_eq!(with, without - 1);
    }
}
