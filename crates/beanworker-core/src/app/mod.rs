//! App - wiring ports into a working consumer.
//!
//! # Main components
//! - **RunnerBuilder**: construction and startup checks
//! - **Runner**: the consume loop (reserve → decode → validate → invoke → delete/bury)
//! - **WorkerConfig**: the YAML configuration file

pub mod builder;
pub mod config;
pub mod runner;

pub use self::builder::{ConstructionError, RunnerBuilder};
pub use self::config::{ConfigError, DecoderKind, WorkerConfig};
pub use self::runner::{LoopState, Runner, TimeoutReached};
