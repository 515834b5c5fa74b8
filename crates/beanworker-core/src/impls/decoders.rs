//! Built-in payload decoders.

use serde_json::Value;

use crate::ports::{DecodeError, PayloadDecoder};

/// YAML decoder; JSON bodies decode too, JSON being a subset of YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDecoder;

impl PayloadDecoder for YamlDecoder {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn decode(&self, body: &[u8]) -> Result<Value, DecodeError> {
        Ok(serde_yaml::from_slice(body)?)
    }
}

/// Strict JSON decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl PayloadDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, body: &[u8]) -> Result<Value, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }
}
