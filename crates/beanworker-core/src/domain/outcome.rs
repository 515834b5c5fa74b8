//! Outcome model: how the processing of one reserved job ended.
//!
//! The outcome only selects the terminal broker call (`delete` or `bury`) and
//! the shape of the log record. It is never persisted.

use serde_json::Value;

use super::JobError;

/// Result of processing one job.
///
/// - `Acknowledged`: the job was deleted.
/// - `Rejected`: the job is buried; a warning is logged.
/// - `Fatal`: the callable itself failed; the job is buried and the error is
///   logged with its full diagnostic chain.
#[derive(Debug)]
pub enum Outcome {
    Acknowledged,
    Rejected(JobError),
    Fatal(JobError),
}

impl Outcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Outcome::Acknowledged)
    }

    /// The failure carried by a `Rejected` or `Fatal` outcome.
    pub fn reason(&self) -> Option<&JobError> {
        match self {
            Outcome::Acknowledged => None,
            Outcome::Rejected(err) | Outcome::Fatal(err) => Some(err),
        }
    }
}

impl From<JobError> for Outcome {
    fn from(err: JobError) -> Self {
        if err.is_fatal() {
            Outcome::Fatal(err)
        } else {
            Outcome::Rejected(err)
        }
    }
}

/// Truthiness of a decoded payload or a callable's return value.
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
