//! In-memory broker for development and tests.
//!
//! Mirrors the beanstalkd semantics the consume loop relies on: per-tube ready
//! queues ordered by (priority, id), reservations owned by one connection,
//! buried jobs kept aside, deleted jobs gone for good (so `stats_job` answers
//! `NotFound` afterwards).
//!
//! # Fault injection
//!
//! Tests steer the consume loop into its failure branches with:
//!
//! - `ignore_deletes`: `delete` answers success but the job stays put.
//! - `sever_connections`: every open connection fails with `Closed`.
//! - `fail_next`: the next command at a given point answers a chosen error.
//!
//! ```
//! use beanworker_core::impls::{FaultPoint, MemoryBroker};
//! use beanworker_core::ports::BrokerError;
//!
//! # async fn demo() {
//! let broker = MemoryBroker::new();
//! broker.fail_next(FaultPoint::Bury, BrokerError::NotFound).await;
//! # }
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{DEFAULT_PRIORITY, DEFAULT_TUBE, Job, JobId, JobStats};
use crate::ports::{Broker, BrokerError, Connector};

/// Time-to-run given to jobs put without one.
pub const DEFAULT_TTR: u64 = 120;

/// Broker-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryJobState {
    Ready,
    Reserved,
    Buried,
}

impl MemoryJobState {
    fn as_str(self) -> &'static str {
        match self {
            MemoryJobState::Ready => "ready",
            MemoryJobState::Reserved => "reserved",
            MemoryJobState::Buried => "buried",
        }
    }
}

/// Commands that changed broker state, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    Watch(String),
    Ignore(String),
    Reserve(JobId),
    Delete(JobId),
    Bury(JobId, u32),
    Close,
}

/// Command a fault from `MemoryBroker::fail_next` is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Reserve,
    StatsJob,
    Delete,
    Bury,
}

#[derive(Debug)]
struct Entry {
    tube: String,
    pri: u32,
    ttr: u64,
    body: Vec<u8>,
    state: MemoryJobState,
    /// Connection holding the reservation.
    owner: Option<u64>,
    reserves: u64,
    buries: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_job_id: u64,
    next_conn_id: u64,
    /// Connections opened before this generation are dead.
    generation: u64,
    jobs: HashMap<JobId, Entry>,
    ready: HashMap<String, BTreeSet<(u32, JobId)>>,
    history: Vec<BrokerOp>,
    ignore_deletes: bool,
    faults: HashMap<FaultPoint, VecDeque<BrokerError>>,
}

impl MemoryState {
    fn allocate_job_id(&mut self) -> JobId {
        self.next_job_id += 1;
        JobId::new(self.next_job_id)
    }

    fn stats(&self, id: JobId) -> Option<JobStats> {
        let entry = self.jobs.get(&id)?;
        let mut stats = JobStats::reserved(id, entry.tube.clone(), entry.pri, entry.ttr);
        stats.state = entry.state.as_str().to_string();
        stats.reserves = entry.reserves;
        stats.buries = entry.buries;
        if entry.state != MemoryJobState::Reserved {
            stats.time_left = 0;
        }
        Some(stats)
    }

    /// Lowest (priority, id) across the given tubes.
    fn next_ready(&self, tubes: &[String]) -> Option<(String, u32, JobId)> {
        tubes
            .iter()
            .filter_map(|tube| {
                self.ready
                    .get(tube)
                    .and_then(|set| set.first())
                    .map(|&(pri, id)| (tube.clone(), pri, id))
            })
            .min_by_key(|(_, pri, id)| (*pri, *id))
    }

    fn take_fault(&mut self, point: FaultPoint) -> Result<(), BrokerError> {
        match self.faults.get_mut(&point).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn owned_by(&self, id: JobId, conn: u64) -> bool {
        self.jobs
            .get(&id)
            .is_some_and(|e| e.state == MemoryJobState::Reserved && e.owner == Some(conn))
    }
}

/// Shared in-memory broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, tube: &str, body: impl Into<Vec<u8>>) -> JobId {
        self.put_with(tube, body, DEFAULT_PRIORITY, DEFAULT_TTR).await
    }

    pub async fn put_with(&self, tube: &str, body: impl Into<Vec<u8>>, pri: u32, ttr: u64) -> JobId {
        let id = {
            let mut state = self.state.lock().await;
            let id = state.allocate_job_id();
            state.jobs.insert(
                id,
                Entry {
                    tube: tube.to_string(),
                    pri,
                    ttr,
                    body: body.into(),
                    state: MemoryJobState::Ready,
                    owner: None,
                    reserves: 0,
                    buries: 0,
                },
            );
            state.ready.entry(tube.to_string()).or_default().insert((pri, id));
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// `None` once the job has been deleted.
    pub async fn job_state(&self, id: JobId) -> Option<MemoryJobState> {
        let state = self.state.lock().await;
        state.jobs.get(&id).map(|e| e.state)
    }

    pub async fn history(&self) -> Vec<BrokerOp> {
        self.state.lock().await.history.clone()
    }

    pub async fn deletes_of(&self, id: JobId) -> usize {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .filter(|op| matches!(op, BrokerOp::Delete(d) if *d == id))
            .count()
    }

    pub async fn buries_of(&self, id: JobId) -> usize {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .filter(|op| matches!(op, BrokerOp::Bury(b, _) if *b == id))
            .count()
    }

    /// Make `delete` answer success without removing the job.
    pub async fn ignore_deletes(&self, enabled: bool) {
        self.state.lock().await.ignore_deletes = enabled;
    }

    /// Answer the next command at `point` with `err`, on any connection.
    /// Queued faults fire in order; the failed command changes nothing.
    pub async fn fail_next(&self, point: FaultPoint, err: BrokerError) {
        self.state
            .lock()
            .await
            .faults
            .entry(point)
            .or_default()
            .push_back(err);
    }

    /// Kill every open connection; later `connect` calls succeed again.
    pub async fn sever_connections(&self) {
        {
            let mut state = self.state.lock().await;
            state.generation += 1;
            for entry in state.jobs.values_mut() {
                if entry.state == MemoryJobState::Reserved {
                    entry.state = MemoryJobState::Ready;
                    entry.owner = None;
                }
            }
            let requeue: Vec<(String, u32, JobId)> = state
                .jobs
                .iter()
                .filter(|(_, e)| e.state == MemoryJobState::Ready)
                .map(|(id, e)| (e.tube.clone(), e.pri, *id))
                .collect();
            for (tube, pri, id) in requeue {
                state.ready.entry(tube).or_default().insert((pri, id));
            }
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn Broker>, BrokerError> {
        let mut state = self.state.lock().await;
        state.next_conn_id += 1;
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            id: state.next_conn_id,
            generation: state.generation,
            watching: vec![DEFAULT_TUBE.to_string()],
            closed: false,
        }))
    }
}

/// One session against a `MemoryBroker`.
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    generation: u64,
    watching: Vec<String>,
    closed: bool,
}

impl MemoryConnection {
    fn check_alive(&self, state: &MemoryState) -> Result<(), BrokerError> {
        if self.closed || state.generation != self.generation {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryConnection {
    async fn watch(&mut self, tube: &str) -> Result<usize, BrokerError> {
        let mut state = self.broker.state.lock().await;
        self.check_alive(&state)?;
        if !self.watching.iter().any(|t| t == tube) {
            self.watching.push(tube.to_string());
        }
        state.history.push(BrokerOp::Watch(tube.to_string()));
        Ok(self.watching.len())
    }

    async fn ignore(&mut self, tube: &str) -> Result<usize, BrokerError> {
        let mut state = self.broker.state.lock().await;
        self.check_alive(&state)?;
        if self.watching.len() == 1 && self.watching[0] == tube {
            return Err(BrokerError::CommandFailed {
                command: format!("ignore {tube}"),
                response: "NOT_IGNORED".to_string(),
            });
        }
        self.watching.retain(|t| t != tube);
        state.history.push(BrokerOp::Ignore(tube.to_string()));
        Ok(self.watching.len())
    }

    async fn reserve(&mut self, timeout: Option<Duration>) -> Result<Option<Job>, BrokerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.broker.state.lock().await;
                self.check_alive(&state)?;
                state.take_fault(FaultPoint::Reserve)?;
                if let Some((tube, pri, id)) = state.next_ready(&self.watching) {
                    if let Some(set) = state.ready.get_mut(&tube) {
                        set.remove(&(pri, id));
                    }
                    let conn = self.id;
                    let body = match state.jobs.get_mut(&id) {
                        Some(entry) => {
                            entry.state = MemoryJobState::Reserved;
                            entry.owner = Some(conn);
                            entry.reserves += 1;
                            entry.body.clone()
                        }
                        None => continue,
                    };
                    state.history.push(BrokerOp::Reserve(id));
                    return Ok(Some(Job::new(id, body)));
                }
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(deadline) => return Ok(None),
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats, BrokerError> {
        let mut state = self.broker.state.lock().await;
        self.check_alive(&state)?;
        state.take_fault(FaultPoint::StatsJob)?;
        state.stats(id).ok_or(BrokerError::NotFound)
    }

    async fn delete(&mut self, id: JobId) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock().await;
        self.check_alive(&state)?;
        state.take_fault(FaultPoint::Delete)?;
        let deletable = match state.jobs.get(&id) {
            Some(entry) => entry.state != MemoryJobState::Reserved || entry.owner == Some(self.id),
            None => false,
        };
        if !deletable {
            return Err(BrokerError::NotFound);
        }
        state.history.push(BrokerOp::Delete(id));
        if state.ignore_deletes {
            return Ok(());
        }
        if let Some(entry) = state.jobs.remove(&id) {
            if let Some(set) = state.ready.get_mut(&entry.tube) {
                set.remove(&(entry.pri, id));
            }
        }
        Ok(())
    }

    async fn bury(&mut self, id: JobId, priority: u32) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock().await;
        self.check_alive(&state)?;
        state.take_fault(FaultPoint::Bury)?;
        if !state.owned_by(id, self.id) {
            return Err(BrokerError::NotFound);
        }
        if let Some(entry) = state.jobs.get_mut(&id) {
            entry.state = MemoryJobState::Buried;
            entry.owner = None;
            entry.pri = priority;
            entry.buries += 1;
        }
        state.history.push(BrokerOp::Bury(id, priority));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.broker.state.lock().await;
        let conn = self.id;
        let released: Vec<(String, u32, JobId)> = state
            .jobs
            .iter_mut()
            .filter(|(_, e)| e.state == MemoryJobState::Reserved && e.owner == Some(conn))
            .map(|(id, e)| {
                e.state = MemoryJobState::Ready;
                e.owner = None;
                (e.tube.clone(), e.pri, *id)
            })
            .collect();
        for (tube, pri, id) in released {
            state.ready.entry(tube).or_default().insert((pri, id));
        }
        state.history.push(BrokerOp::Close);
        drop(state);
        self.broker.notify.notify_waiters();
        Ok(())
    }
}
