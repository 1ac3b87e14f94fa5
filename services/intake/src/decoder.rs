//! Request body decoding.
//!
//! Bodies arrive as raw bytes. An empty body decodes to an empty object so
//! that clients posting nothing still reach validation instead of failing as
//! malformed input.

use serde_json::{Map, Value};
use thiserror::Error;

/// A non-empty body that is not valid JSON
#[derive(Debug, Error)]
#[error("Invalid JSON: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Decode a request body into a JSON value
pub fn decode_body(body: &[u8]) -> Result<Value, DecodeError> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    Ok(serde_json::from_slice(body)?)
}
