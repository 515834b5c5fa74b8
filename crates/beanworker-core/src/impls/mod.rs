//! Impls - adapters behind the ports.
//!
//! - **BeanstalkConnector**: TCP client for a beanstalkd server
//! - **MemoryBroker**: in-process broker for development and tests, with fault injection
//! - **YamlDecoder** / **JsonDecoder**: payload decoders

pub mod beanstalk;
pub mod decoders;
pub mod memory;

pub use self::beanstalk::{BeanstalkConnection, BeanstalkConnector, DEFAULT_PORT};
pub use self::decoders::{JsonDecoder, YamlDecoder};
pub use self::memory::{BrokerOp, FaultPoint, MemoryBroker, MemoryJobState};
