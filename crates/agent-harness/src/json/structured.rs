use std::future::Future;

use serde_json::Value;

use super::{ParseState, recover, validate};
use crate::errors::{NoObjectCause, NoObjectGeneratedError};

/// Recovers a value from `text` and validates it against `schema`.
///
/// A failed parse short-circuits with a parse cause; otherwise the recovered
/// value (`null` for empty text) is validated and a violation yields a
/// validation cause.
pub fn parse_and_validate(text: &str, schema: &Value) -> Result<Value, NoObjectGeneratedError> {
    let recovered = recover(text);
    if recovered.state == ParseState::Failed {
        let cause = match recovered.error {
            Some(err) => NoObjectCause::Parse(err),
            None => NoObjectCause::Parse(crate::errors::JsonParseError {
                message: "unrecoverable JSON".into(),
                line: 0,
                column: 0,
            }),
        };
        return Err(NoObjectGeneratedError {
            text: text.to_string(),
            cause,
        });
    }
    let value = recovered.value.unwrap_or(Value::Null);
    match validate(&value, schema) {
        Ok(()) => Ok(value),
        Err(err) => Err(NoObjectGeneratedError {
            text: text.to_string(),
            cause: NoObjectCause::Validation(err),
        }),
    }
}

/// Like [`parse_and_validate`], with one repair chance.
///
/// On failure `repair` receives the original text and the error and returns
/// replacement text, which is parsed and validated again. `repair` is `FnOnce`,
/// so it runs at most once per call. A second failure reports the second
/// attempt's text and error.
pub fn parse_and_validate_with_repair<F>(
    text: &str,
    schema: &Value,
    repair: F,
) -> Result<Value, NoObjectGeneratedError>
where
    F: FnOnce(&str, &NoObjectGeneratedError) -> String,
{
    match parse_and_validate(text, schema) {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!(error = %first, "structured output failed, attempting repair");
            let repaired = repair(text, &first);
            parse_and_validate(&repaired, schema)
        }
    }
}

/// Async variant of [`parse_and_validate_with_repair`], for repair strategies
/// that call a model.
pub async fn parse_and_validate_with_repair_async<F, Fut>(
    text: &str,
    schema: &Value,
    repair: F,
) -> Result<Value, NoObjectGeneratedError>
where
    F: FnOnce(String, NoObjectGeneratedError) -> Fut,
    Fut: Future<Output = String>,
{
    match parse_and_validate(text, schema) {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!(error = %first, "structured output failed, attempting async repair");
            let repaired = repair(text.to_string(), first).await;
            parse_and_validate(&repaired, schema)
        }
    }
}

/// Tracks streamed text and yields each newly recoverable partial object.
#[derive(Debug, Default)]
pub struct PartialObjectTracker {
    buffer: String,
    last: Option<Value>,
}

impl PartialObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text delta; returns the recovered value when it changed.
    pub fn push(&mut self, delta: &str) -> Option<Value> {
        self.buffer.push_str(delta);
        let value = recover(&self.buffer).value?;
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        self.last = Some(value.clone());
        Some(value)
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Most recent value yielded by [`push`](Self::push).
    pub fn latest(&self) -> Option<&Value> {
        self.last.as_ref()
    }
}
