use jsonschema::JSONSchema;
use serde_json::Value;

use crate::errors::{SchemaIssue, SchemaValidationError};

/// Validates `value` against `schema`, compiling the schema on every call.
///
/// All violations are reported, in the order the validator yields them, so the
/// rendered error text is stable for a fixed input.
pub fn validate(value: &Value, schema: &Value) -> Result<(), SchemaValidationError> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|err| SchemaValidationError::InvalidSchema(err.to_string()))?;
    let result = compiled.validate(value);
    if let Err(errors) = result {
        let issues = errors
            .map(|err| {
                let path = err.instance_path.to_string();
                SchemaIssue {
                    path: if path.is_empty() { "/".to_string() } else { path },
                    message: err.to_string(),
                }
            })
            .collect::<Vec<_>>();
        return Err(SchemaValidationError::Violations(issues));
    }
    Ok(())
}
