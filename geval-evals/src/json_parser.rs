// Copyright 2025 GEval Contributors (https://github.com/geval-rs/geval)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! JSON recovery from model output
//!
//! Models often wrap JSON in prose or Markdown fences. Extraction tries
//! increasingly permissive patterns and returns the first span that parses:
//!
//! 1. the whole text
//! 2. the first flat `{...}` object
//! 3. the first object with one level of nested objects
//! 4. the first flat `[...]` array
//! 5. the body of a fenced code block (optionally tagged `json`)

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static FLAT_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("valid flat object pattern"));

static NESTED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:[^{}]|\{[^{}]*\})*\}").expect("valid nested object pattern")
});

static FLAT_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[\]]*\]").expect("valid flat array pattern"));

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\}|\[.*?\])\s*```").expect("valid code block pattern")
});

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to extract valid JSON from text")]
    NoJsonFound,

    #[error("Extracted JSON has unexpected shape: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Extract the first parseable JSON value from `text`
pub fn extract_json(text: &str) -> Result<Value, ExtractionError> {
    if let Some(value) = try_parse(text) {
        return Ok(value);
    }

    for pattern in [&*FLAT_OBJECT, &*NESTED_OBJECT, &*FLAT_ARRAY] {
        if let Some(value) = pattern.find(text).and_then(|m| try_parse(m.as_str())) {
            return Ok(value);
        }
    }

    if let Some(value) = CODE_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|body| try_parse(body.as_str()))
    {
        return Ok(value);
    }

    Err(ExtractionError::NoJsonFound)
}

/// Extract JSON and deserialize it into `T`
pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionError> {
    let value = extract_json(text)?;
    Ok(serde_json::from_value(value)?)
}

/// Like [`extract_json_as`], returning `fallback` on any failure
pub fn safe_json_parse<T: DeserializeOwned>(text: &str, fallback: T) -> T {
    extract_json_as(text).unwrap_or(fallback)
}

fn try_parse(candidate: &str) -> Option<Value> {
    match serde_json::from_str(candidate) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::trace!("JSON candidate rejected: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_verbatim() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(extract_json("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(extract_json("42").unwrap(), json!(42));
    }

    #[test]
    fn test_object_in_prose() {
        assert_eq!(
            extract_json(r#"noise {"a":1} noise"#).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_flat_span_preferred_over_nested() {
        // The flat pattern runs first and the innermost object is a valid match
        let text = r#"Here you go: {"score": 7, "detail": {"why": "ok"}} thanks"#;
        assert_eq!(extract_json(text).unwrap(), json!({"why": "ok"}));
    }

    #[test]
    fn test_array_in_prose() {
        assert_eq!(
            extract_json(r#"steps: ["a", "b"] done"#).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_code_block() {
        assert_eq!(
            extract_json("```json\n{\"a\":1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_code_block_with_brace_in_string() {
        // The brace inside the string cuts the object spans short; the fence still works
        let text = "Result:\n```json\n{\"brace\": \"}\"}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"brace": "}"}));
    }

    #[test]
    fn test_no_json() {
        assert!(matches!(
            extract_json("not json at all"),
            Err(ExtractionError::NoJsonFound)
        ));
        assert!(extract_json("{broken: json}").is_err());
    }

    #[test]
    fn test_extract_as() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Steps {
            steps: Vec<String>,
        }

        let steps: Steps = extract_json_as(r#"Sure! {"steps": ["one", "two"]}"#).unwrap();
        assert_eq!(steps.steps, vec!["one", "two"]);

        let err = extract_json_as::<Steps>(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::Deserialize(_)));
    }

    #[test]
    fn test_safe_json_parse() {
        assert_eq!(safe_json_parse("not json", json!({"x": 0})), json!({"x": 0}));
        assert_eq!(
            safe_json_parse(r#"{"x": 5}"#, json!({"x": 0})),
            json!({"x": 5})
        );

        let fallback: Vec<u32> = safe_json_parse(r#"{"not": "a list"}"#, vec![7]);
        assert_eq!(fallback, vec![7]);
    }
}
