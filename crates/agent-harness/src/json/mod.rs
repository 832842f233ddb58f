//! Best-effort JSON recovery, schema validation and the structured output
//! pipeline built from the two.

mod repair;
pub mod schema;
pub mod structured;

use serde_json::Value;

use crate::errors::JsonParseError;

pub use repair::repair;
pub use schema::validate;
pub use structured::{
    PartialObjectTracker, parse_and_validate, parse_and_validate_with_repair,
    parse_and_validate_with_repair_async,
};

/// How a [`recover`] attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseState {
    /// The input was empty.
    Undefined,
    /// Strict parse succeeded.
    Successful,
    /// Parse succeeded after [`repair`].
    Repaired,
    /// Neither strict parse nor repair produced a value.
    Failed,
}

/// Result of one [`recover`] attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Recovered {
    pub value: Option<Value>,
    pub state: ParseState,
    /// Set only when `state` is `Failed`; describes the post-repair parse.
    pub error: Option<JsonParseError>,
}

impl Recovered {
    pub fn into_parts(self) -> (Option<Value>, ParseState, Option<JsonParseError>) {
        (self.value, self.state, self.error)
    }
}

/// Parses possibly incomplete or malformed JSON text.
///
/// Strict parse first; on failure the text is repaired once and re-parsed.
pub fn recover(text: &str) -> Recovered {
    if text.trim().is_empty() {
        return Recovered {
            value: None,
            state: ParseState::Undefined,
            error: None,
        };
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Recovered {
            value: Some(value),
            state: ParseState::Successful,
            error: None,
        };
    }
    let repaired = repair(text);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => Recovered {
            value: Some(value),
            state: ParseState::Repaired,
            error: None,
        },
        Err(err) => Recovered {
            value: None,
            state: ParseState::Failed,
            error: Some(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_input_is_undefined_without_error() {
        for text in ["", "   ", "\n\t"] {
            assert_eq!(recover(text).into_parts(), (None, ParseState::Undefined, None));
        }
    }

    #[test]
    fn well_formed_input_matches_strict_parse() {
        let samples = [
            r#"{"a":1,"b":[true,null,"x"],"c":{"d":-1.5e3}}"#,
            "[]",
            "42",
            r#""text""#,
            " { \"spaced\" : [ 1 , 2 ] } ",
        ];
        for sample in samples {
            let recovered = recover(sample);
            let expected: Value = serde_json::from_str(sample).expect("well formed");
            assert_eq!(recovered.state, ParseState::Successful);
            assert_eq!(recovered.value, Some(expected));
            assert!(recovered.error.is_none());
        }
    }

    #[test]
    fn truncation_at_container_boundaries_is_repaired() {
        let full = r#"{"a":{"b":[1,{"c":2}]},"d":[3,[4]],"e":{}}"#;
        let first_key_end = full.find(':').expect("colon");
        for (idx, c) in full.char_indices() {
            if idx <= first_key_end || !matches!(c, '{' | '}' | '[' | ']') {
                continue;
            }
            for cut in [idx, idx + 1] {
                if cut >= full.len() {
                    continue;
                }
                let recovered = recover(&full[..cut]);
                assert_eq!(
                    recovered.state,
                    ParseState::Repaired,
                    "cut at {cut}: {:?}",
                    &full[..cut]
                );
                assert!(recovered.value.as_ref().is_some_and(Value::is_object));
            }
        }
    }

    #[test]
    fn repaired_values_keep_partial_content() {
        let recovered = recover(r#"{"name":"Ada","skills":["math","poe"#);
        assert_eq!(recovered.state, ParseState::Repaired);
        assert_eq!(
            recovered.value,
            Some(json!({"name":"Ada","skills":["math","poe"]}))
        );
    }

    #[test]
    fn unrecoverable_input_fails_with_post_repair_error() {
        let recovered = recover("definitely not json");
        assert_eq!(recovered.state, ParseState::Failed);
        assert!(recovered.value.is_none());
        let err = recovered.error.expect("error");
        assert_eq!(err.line, 1);
    }
}
