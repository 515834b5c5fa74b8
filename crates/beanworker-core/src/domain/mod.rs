//! Domain model (ids, jobs, tubes, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod tubes;

pub use self::errors::{JobError, WorkerError};
pub use self::ids::JobId;
pub use self::job::{DEFAULT_PRIORITY, Job, JobStats};
pub use self::outcome::{Outcome, is_truthy};
pub use self::tubes::{DEFAULT_TUBE, Tubes, TubesError};
