//! Reserved jobs and their broker-side statistics.

use serde::{Deserialize, Serialize};

use super::JobId;

/// Priority beanstalkd assigns when the producer does not choose one.
pub const DEFAULT_PRIORITY: u32 = 1 << 31;

/// A job handed to this worker by a reservation.
///
/// The worker owns the reservation until it either deletes or buries the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    body: Vec<u8>,
}

impl Job {
    pub fn new(id: JobId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Answer to a `stats-job` query.
///
/// Field names follow the YAML dictionary beanstalkd sends back; keys the
/// worker does not look at are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobStats {
    pub id: JobId,
    pub tube: String,
    /// `ready`, `reserved`, `delayed` or `buried`.
    pub state: String,
    #[serde(default = "default_priority")]
    pub pri: u32,
    #[serde(default)]
    pub age: u64,
    #[serde(default)]
    pub ttr: u64,
    /// Seconds until the reservation expires and the broker hands the job out again.
    #[serde(default)]
    pub time_left: u64,
    #[serde(default)]
    pub reserves: u64,
    #[serde(default)]
    pub timeouts: u64,
    #[serde(default)]
    pub releases: u64,
    #[serde(default)]
    pub buries: u64,
    #[serde(default)]
    pub kicks: u64,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl JobStats {
    /// Stats for a freshly reserved job; used by brokers that track less state.
    pub fn reserved(id: JobId, tube: impl Into<String>, pri: u32, ttr: u64) -> Self {
        Self {
            id,
            tube: tube.into(),
            state: "reserved".to_string(),
            pri,
            age: 0,
            ttr,
            time_left: ttr,
            reserves: 1,
            timeouts: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_beanstalkd_stats_yaml() {
        let yaml = "---\n\
            id: 12\n\
            tube: jobs-high\n\
            state: reserved\n\
            pri: 1024\n\
            age: 3\n\
            delay: 0\n\
            ttr: 60\n\
            time-left: 59\n\
            file: 0\n\
            reserves: 1\n\
            timeouts: 0\n\
            releases: 0\n\
            buries: 0\n\
            kicks: 0\n";
        let stats: JobStats = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(stats.id, JobId::new(12));
        assert_eq!(stats.tube, "jobs-high");
        assert_eq!(stats.pri, 1024);
        assert_eq!(stats.time_left, 59);
    }

    #[test]
    fn missing_priority_falls_back_to_default() {
        let stats: JobStats = serde_yaml::from_str("id: 1\ntube: default\nstate: ready\n").unwrap();
        assert_eq!(stats.pri, DEFAULT_PRIORITY);
    }

    #[test]
    fn empty_body_is_reported() {
        assert!(Job::new(JobId::new(1), Vec::new()).is_empty());
        assert!(!Job::new(JobId::new(1), "x").is_empty());
    }
}
