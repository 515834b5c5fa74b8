//! Runner - the consume loop.
//!
//! One job at a time: reserve → stats → decode → validate → invoke →
//! delete or bury. Everything that goes wrong with a single job is contained
//! here and ends in one `bury`; only a broken connection leaves `run`.
//!
//! # Key points
//! - Per-job failures become an `Outcome`, broker failures stay `BrokerError`
//! - A delete counts only once `stats-job` stops finding the job
//! - Callables run on their own task, so a panic is just another failed job

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::contract::{ArgumentContract, Arguments, Callable, TUBE_FIELD, Validation};
use crate::domain::{
    DEFAULT_PRIORITY, DEFAULT_TUBE, Job, JobError, JobId, Outcome, Tubes, WorkerError, is_truthy,
};
use crate::ports::{Broker, BrokerError, Connector, DecodeError, PayloadDecoder};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Reserving,
    Processing,
    Acknowledging,
    Rejecting,
    TimedOut,
    Terminated,
}

/// No job arrived within the reservation timeout. The planned way out of `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutReached {
    pub timeout: Duration,
}

impl fmt::Display for TimeoutReached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no job reserved within {}s", self.timeout.as_secs())
    }
}

/// Consumes jobs from a set of tubes and hands them to one callable.
///
/// Built by [`RunnerBuilder`](super::RunnerBuilder).
///
/// # Flow
/// 1. `reserve` (bounded by the run's timeout)
/// 2. `stats-job` for the tube and priority; a vanished job is skipped,
///    any other answer buries it at `DEFAULT_PRIORITY`
/// 3. decode the body and check it against the `ArgumentContract`
/// 4. call the callable with the declared fields, plus `__tube__` if asked for
/// 5. truthy result: `delete`, then confirm with `stats-job`
/// 6. anything else: `bury` at the job's own priority
pub struct Runner {
    pub(super) callable: Arc<dyn Callable>,
    pub(super) contract: ArgumentContract,
    pub(super) host: String,
    pub(super) port: u16,
    pub(super) tubes: Tubes,
    pub(super) parse: bool,
    pub(super) decoder: Arc<dyn PayloadDecoder>,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) connection: Option<Box<dyn Broker>>,
    pub(super) state: LoopState,
}

impl Runner {
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn callable_name(&self) -> &str {
        self.callable.name()
    }

    pub fn contract(&self) -> &ArgumentContract {
        &self.contract
    }

    pub fn tubes(&self) -> &Tubes {
        &self.tubes
    }

    pub fn address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn parses_bodies(&self) -> bool {
        self.parse
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Consume jobs until `timeout` passes without a reservation.
    ///
    /// `None` waits forever, so the only way out is a connection failure.
    /// The connection is opened on the first call and reused afterwards; after
    /// a connection failure it is dropped and the next call reconnects.
    pub async fn run(&mut self, timeout: Option<Duration>) -> Result<TimeoutReached, WorkerError> {
        let mut broker = match self.connection.take() {
            Some(broker) => broker,
            None => match self.connect().await {
                Ok(broker) => broker,
                Err(err) => {
                    self.state = LoopState::Terminated;
                    return Err(err.into());
                }
            },
        };

        let result = self.consume(broker.as_mut(), timeout).await;
        self.state = LoopState::Terminated;
        match result {
            Ok(reached) => {
                self.connection = Some(broker);
                Ok(reached)
            }
            Err(err) => {
                error!(error = %err, "broker connection lost");
                if let Err(close_err) = broker.close().await {
                    debug!(error = %close_err, "closing broken connection failed");
                }
                Err(err.into())
            }
        }
    }

    /// Release the broker connection. Never fails.
    pub async fn close(&mut self) {
        if let Some(mut broker) = self.connection.take() {
            if let Err(err) = broker.close().await {
                debug!(error = %err, "error while closing connection");
            }
            info!("connection closed");
        }
        self.state = LoopState::Terminated;
    }

    async fn connect(&self) -> Result<Box<dyn Broker>, BrokerError> {
        let mut broker = self.connector.connect(&self.host, self.port).await?;
        for tube in self.tubes.iter() {
            broker.watch(tube).await?;
        }
        if !self.tubes.contains(DEFAULT_TUBE) {
            broker.ignore(DEFAULT_TUBE).await?;
        }
        info!(
            host = %self.host,
            port = self.port,
            tubes = %self.tubes,
            callable = self.callable.name(),
            "connected; watching tubes"
        );
        Ok(broker)
    }

    async fn consume(
        &mut self,
        broker: &mut dyn Broker,
        timeout: Option<Duration>,
    ) -> Result<TimeoutReached, BrokerError> {
        loop {
            self.state = LoopState::Reserving;
            let Some(job) = broker.reserve(timeout).await? else {
                self.state = LoopState::TimedOut;
                let reached = TimeoutReached {
                    timeout: timeout.unwrap_or_default(),
                };
                info!(%reached, "stopping");
                return Ok(reached);
            };

            self.state = LoopState::Processing;
            let id = job.id();
            let stats = match broker.stats_job(id).await {
                Ok(stats) => stats,
                Err(err) if err.is_connection_failure() => return Err(err),
                Err(BrokerError::NotFound) => {
                    warn!(job = %id, "reserved job has vanished; skipping");
                    continue;
                }
                Err(err) => {
                    // Still reserved by us, but its priority is unknown.
                    self.state = LoopState::Rejecting;
                    warn!(job = %id, error = %err, "could not query reserved job; burying job");
                    bury(broker, id, DEFAULT_PRIORITY).await?;
                    continue;
                }
            };
            info!(
                job = %id,
                tube = %stats.tube,
                time_left = stats.time_left,
                "reserved job"
            );

            let outcome = match self.process(&job, &stats.tube).await {
                Ok(()) => {
                    self.state = LoopState::Acknowledging;
                    acknowledge(broker, id).await?
                }
                Err(err) => Outcome::from(err),
            };

            match outcome {
                Outcome::Acknowledged => info!(job = %id, "job deleted"),
                Outcome::Rejected(reason) => {
                    self.state = LoopState::Rejecting;
                    warn!(job = %id, reason = %reason, "burying job");
                    bury(broker, id, stats.pri).await?;
                }
                Outcome::Fatal(reason) => {
                    self.state = LoopState::Rejecting;
                    error!(job = %id, reason = %reason, detail = ?reason, "callable failed; burying job");
                    bury(broker, id, stats.pri).await?;
                }
            }
        }
    }

    /// Run one job through the callable. `Ok` means the job should be deleted.
    async fn process(&self, job: &Job, tube: &str) -> Result<(), JobError> {
        if job.is_empty() {
            return Err(JobError::EmptyBody);
        }

        let args = if self.parse {
            Arguments::Fields(self.prepare(job.body(), tube)?)
        } else {
            Arguments::Body {
                body: job.body().to_vec(),
                tube: self.contract.declares(TUBE_FIELD).then(|| tube.to_string()),
            }
        };

        let value = self.invoke(args).await?;
        if !is_truthy(&value) {
            return Err(JobError::FalsyResult);
        }
        Ok(())
    }

    /// Decode, validate and trim a body into the callable's arguments.
    fn prepare(&self, body: &[u8], tube: &str) -> Result<Map<String, Value>, JobError> {
        let value = self.decoder.decode(body)?;
        if !is_truthy(&value) {
            return Err(JobError::EmptyPayload);
        }
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(DecodeError::NotAMapping {
                    found: value_kind(&other),
                }
                .into());
            }
        };

        if let Validation::Invalid { missing } = self.contract.validate(fields.keys().map(String::as_str)) {
            return Err(JobError::MissingFields(missing));
        }

        let dropped = self.contract.retain_declared(&mut fields);
        if !dropped.is_empty() {
            debug!(dropped = %dropped.join(", "), "ignoring undeclared fields");
        }
        if self.contract.declares(TUBE_FIELD) {
            fields.insert(TUBE_FIELD.to_string(), Value::String(tube.to_string()));
        }
        Ok(fields)
    }

    /// Call on a separate task so a panic stays contained.
    ///
    /// The panic's location (and backtrace, when `RUST_BACKTRACE` asks for
    /// one) is folded into `JobError::Panicked` so it reaches the log.
    async fn invoke(&self, args: Arguments) -> Result<Value, JobError> {
        install_panic_hook();
        let site = PanicSite::default();
        let callable = Arc::clone(&self.callable);
        let task = PANIC_SITE.scope(Arc::clone(&site), async move { callable.call(args).await });
        match tokio::spawn(task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(JobError::Invocation(err)),
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                let at = site.lock().ok().and_then(|mut slot| slot.take());
                Err(JobError::Panicked(match at {
                    Some(at) => format!("{message} at {at}"),
                    None => message,
                }))
            }
            Err(join) => Err(JobError::Panicked(join.to_string())),
        }
    }
}

/// Delete, then confirm the job is gone.
///
/// beanstalkd answers `stats-job` for a deleted job with `NOT_FOUND`, so a
/// failed query confirms the deletion and a successful one refutes it.
async fn acknowledge(broker: &mut dyn Broker, id: JobId) -> Result<Outcome, BrokerError> {
    match broker.delete(id).await {
        Ok(()) => {}
        Err(err) if err.is_connection_failure() => return Err(err),
        Err(err) => return Ok(Outcome::Rejected(JobError::NotDeleted(err.to_string()))),
    }
    match broker.stats_job(id).await {
        Ok(stats) => Ok(Outcome::Rejected(JobError::NotDeleted(format!(
            "job is still {} after delete",
            stats.state
        )))),
        Err(err) if err.is_connection_failure() => Err(err),
        Err(_) => Ok(Outcome::Acknowledged),
    }
}

/// Bury at `pri`, normally the job's own priority.
async fn bury(broker: &mut dyn Broker, id: JobId, pri: u32) -> Result<(), BrokerError> {
    match broker.bury(id, pri).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_connection_failure() => Err(err),
        Err(err) => {
            error!(job = %id, error = %err, "could not bury job");
            Ok(())
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

type PanicSite = Arc<Mutex<Option<String>>>;

tokio::task_local! {
    /// Where a callable task records its panic location.
    static PANIC_SITE: PanicSite;
}

/// Chain a hook in front of the current one that records panic locations
/// for callable tasks. Panics elsewhere pass straight through.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = PANIC_SITE.try_with(|site| {
                let mut at = info
                    .location()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown location".to_string());
                let backtrace = Backtrace::capture();
                if backtrace.status() == BacktraceStatus::Captured {
                    at = format!("{at}\n{backtrace}");
                }
                if let Ok(mut slot) = site.lock() {
                    *slot = Some(at);
                }
            });
            previous(info);
        }));
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
