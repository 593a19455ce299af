//! JSON extraction from model responses
//!
//! Models asked for structured output reply with a bare object, a
//! markdown-fenced block, or occasionally near-JSON using single quotes.
//! `extract_json` accepts all three and returns a typed parse error
//! otherwise.

use crate::error::{LlmError, Result};
use regex::Regex;

/// Recover a JSON object from model output text.
///
/// Resolution order: fenced ```json block, any fenced block, first `{` to
/// last `}`. If parsing fails, a single-quote to double-quote rewrite is
/// attempted once before returning `LlmError::Structured`.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    let candidate = fenced_block(text)
        .or_else(|| bare_object(text))
        .ok_or_else(|| {
            LlmError::Structured(format!(
                "no JSON object found in response: {}",
                truncate(text, 120)
            ))
        })?;

    match serde_json::from_str(&candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let requoted = candidate.replace('\'', "\"");
            serde_json::from_str(&requoted).map_err(|_| {
                LlmError::Structured(format!(
                    "invalid JSON in response: {} ({})",
                    first_err,
                    truncate(&candidate, 120)
                ))
            })
        }
    }
}

fn fenced_block(text: &str) -> Option<String> {
    let re = Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static regex");
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bare_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < limit)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_object() {
        let value = extract_json(r#"{"selected_action": "speak"}"#).unwrap();
        assert_eq!(value["selected_action"], "speak");
    }

    #[test]
    fn test_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"score\": 0.9}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 0.9);
    }

    #[test]
    fn test_plain_fence() {
        let text = "```\n{\"flags\": []}\n```";
        let value = extract_json(text).unwrap();
        assert!(value["flags"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let text = "The answer is {\"decision\": \"proceed\"} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["decision"], "proceed");
    }

    #[test]
    fn test_single_quote_recovery() {
        let text = "{'reasoning': 'looks fine', 'plausibility_score': 1.0}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["reasoning"], "looks fine");
    }

    #[test]
    fn test_no_object_is_typed_error() {
        let err = extract_json("I cannot answer that.").unwrap_err();
        assert!(matches!(err, LlmError::Structured(_)));
    }

    #[test]
    fn test_unbalanced_garbage_is_error() {
        let err = extract_json("{{{ not json").unwrap_err();
        assert!(matches!(err, LlmError::Structured(_)));
    }
}
