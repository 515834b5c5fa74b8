//! Ports - the seams between the consume loop and the outside world.
//!
//! - `Broker` / `Connector`: the work-queue server
//! - `PayloadDecoder`: raw job body to structured data

pub mod broker;
pub mod decoder;

pub use self::broker::{Broker, BrokerError, Connector};
pub use self::decoder::{DecodeError, PayloadDecoder};
