//! Errors - per-job failures and the errors that end a run.

use thiserror::Error;

use crate::ports::{BrokerError, DecodeError};

/// Why a single job was not acknowledged.
///
/// Every variant is contained by the consume loop: it becomes one `bury` plus
/// one log record, and the loop moves on to the next reservation.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job's body is empty")]
    EmptyBody,

    #[error("body was not decodable: {0}")]
    Undecodable(#[from] DecodeError),

    #[error("decoded payload is empty")]
    EmptyPayload,

    #[error("payload is missing required fields ({})", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("callable failed: {0:#}")]
    Invocation(anyhow::Error),

    #[error("callable panicked: {0}")]
    Panicked(String),

    #[error("callable returned a falsy result")]
    FalsyResult,

    #[error("job processed but could not be deleted: {0}")]
    NotDeleted(String),
}

impl JobError {
    /// Failures raised by the callable itself; logged with full detail.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::Invocation(_) | JobError::Panicked(_))
    }
}

/// Errors that escape `Runner::run`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("broker connection failed: {0}")]
    Connection(#[from] BrokerError),
}
