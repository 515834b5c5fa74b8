//! Broker port - the work-queue server the worker consumes from.
//!
//! The consume loop only talks to these traits; `impls::beanstalk` speaks the
//! real protocol and `impls::memory` keeps everything in-process.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Job, JobId, JobStats};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by broker")]
    Closed,

    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The job does not exist or is not reserved by this connection.
    #[error("job not found")]
    NotFound,

    #[error("{command} failed: {response}")]
    CommandFailed { command: String, response: String },
}

impl BrokerError {
    /// True when the connection can no longer be trusted.
    ///
    /// `NotFound` and `CommandFailed` are answers about one job; everything
    /// else means the stream is dead or out of sync.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            BrokerError::Io(_) | BrokerError::Closed | BrokerError::Protocol(_)
        )
    }
}

/// One open broker connection.
///
/// A connection is used by exactly one consume loop; methods take `&mut self`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Add a tube to the watch list; returns the number of watched tubes.
    async fn watch(&mut self, tube: &str) -> Result<usize, BrokerError>;

    /// Remove a tube from the watch list; returns the number of watched tubes.
    async fn ignore(&mut self, tube: &str) -> Result<usize, BrokerError>;

    /// Reserve the next job from any watched tube.
    ///
    /// `None` blocks until a job arrives; `Some(t)` returns `Ok(None)` once `t`
    /// elapses without one.
    async fn reserve(&mut self, timeout: Option<Duration>) -> Result<Option<Job>, BrokerError>;

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats, BrokerError>;

    async fn delete(&mut self, id: JobId) -> Result<(), BrokerError>;

    async fn bury(&mut self, id: JobId, priority: u32) -> Result<(), BrokerError>;

    /// Release the connection. Callers treat errors as informational.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Broker>, BrokerError>;
}
