//! PayloadDecoder port - raw job body to structured data.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoded payload is a {found}, expected a mapping of fields")]
    NotAMapping { found: &'static str },
}

/// Decodes a job body.
///
/// Decoders only check syntax. Whether the value is usable as a set of named
/// fields is decided by the consume loop.
pub trait PayloadDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, body: &[u8]) -> Result<Value, DecodeError>;
}
