//! Contract - what a callable expects from a job payload.
//!
//! Two layers:
//! - **Declared**: `Signature` (stated by the integrator) and `Callable`
//! - **Derived**: `ArgumentContract`, built once and checked per job
//!
//! `CallableRegistry` maps dotted names to callables for configuration-driven
//! workers.

pub mod argument;
pub mod callable;
pub mod registry;
pub mod signature;

pub use self::argument::{ArgumentContract, ContractError, TUBE_FIELD, Validation};
pub use self::callable::{Arguments, Callable, FnCallable};
pub use self::registry::{CallableRegistry, RegistryError};
pub use self::signature::{Parameter, Signature};
