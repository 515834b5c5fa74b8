//! Domain identifiers (strongly-typed IDs).
//!
//! The broker hands out plain integers. Wrapping them keeps a job id from being
//! confused with a priority, a byte count or any other number that travels on
//! the same protocol line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a job, as assigned by the broker.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Display prefix used in log records.
    pub const PREFIX: &'static str = "job-";

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value sent back to the broker.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}
