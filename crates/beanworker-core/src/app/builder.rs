//! RunnerBuilder - construction and wiring of a `Runner`.
//!
//! Everything that can be checked before the first reservation is checked in
//! `build()`: the callable is present and introspectable, it expects at least
//! one field, and the tube names are acceptable to beanstalkd.
//!
//! # Key points
//! - Builder pattern; unset options fall back to the `WorkerConfig` defaults
//! - Fail fast: a bad callable or tube name never reaches the consume loop
//! - The connector is swappable, which is how tests run against `MemoryBroker`

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::config::{DEFAULT_HOST, WorkerConfig};
use super::runner::{LoopState, Runner};
use crate::contract::{ArgumentContract, Callable, CallableRegistry, ContractError, RegistryError};
use crate::domain::{Tubes, TubesError};
use crate::impls::{BeanstalkConnector, DEFAULT_PORT, YamlDecoder};
use crate::ports::{Connector, PayloadDecoder};

#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("\"tubes\" must be a tube name or a list of tube names; received {0}")]
    InvalidTubes(&'static str),

    #[error("invalid tube name {0:?}")]
    InvalidTubeName(String),

    #[error(transparent)]
    Unresolvable(#[from] RegistryError),

    #[error("no callable was given")]
    MissingCallable,

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl From<TubesError> for ConstructionError {
    fn from(err: TubesError) -> Self {
        match err {
            TubesError::InvalidType(found) => ConstructionError::InvalidTubes(found),
            TubesError::InvalidName(name) => ConstructionError::InvalidTubeName(name),
        }
    }
}

/// Builds a [`Runner`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use beanworker_core::app::RunnerBuilder;
/// use beanworker_core::contract::{Arguments, FnCallable, Signature};
/// use serde_json::json;
///
/// let greet = FnCallable::new("demo.greet", Signature::new().required("name"), |_args: Arguments| async {
///     anyhow::Ok(json!(true))
/// });
/// let runner = RunnerBuilder::new()
///     .callable(Arc::new(greet))
///     .host("127.0.0.1")
///     .tubes(["greetings"])
///     .build()
///     .unwrap();
/// assert_eq!(runner.contract().required_parameters(), ["name"]);
/// ```
pub struct RunnerBuilder {
    callable: Option<Arc<dyn Callable>>,
    host: String,
    port: u16,
    tubes: Vec<String>,
    parse: bool,
    decoder: Arc<dyn PayloadDecoder>,
    connector: Arc<dyn Connector>,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            callable: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tubes: Vec::new(),
            parse: true,
            decoder: Arc::new(YamlDecoder),
            connector: Arc::new(BeanstalkConnector),
        }
    }

    /// Start from a configuration file's values.
    ///
    /// The callable named in the configuration (if any) is resolved through
    /// `registry`; a malformed `tubes` value fails here.
    pub fn from_config(config: &WorkerConfig, registry: &CallableRegistry) -> Result<Self, ConstructionError> {
        let mut builder = Self::new()
            .host(config.host.clone())
            .port(config.port)
            .parse(config.parse)
            .decoder(config.decoder.decoder());
        if let Some(value) = &config.tubes {
            let tubes = Tubes::from_value(value)?;
            builder = builder.tubes(tubes.iter().map(str::to_string));
        }
        if let Some(name) = &config.callable {
            builder = builder.callable_named(registry, name)?;
        }
        Ok(builder)
    }

    pub fn callable(mut self, callable: Arc<dyn Callable>) -> Self {
        self.callable = Some(callable);
        self
    }

    /// Resolve the callable by dotted name.
    pub fn callable_named(self, registry: &CallableRegistry, name: &str) -> Result<Self, ConstructionError> {
        let callable = registry.resolve(name)?;
        Ok(self.callable(callable))
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the tube list. An empty list means `default`.
    pub fn tubes<I, S>(mut self, tubes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tubes = tubes.into_iter().map(Into::into).collect();
        self
    }

    pub fn tube(mut self, tube: impl Into<String>) -> Self {
        self.tubes.push(tube.into());
        self
    }

    /// `false` hands the callable the raw body instead of decoded fields.
    pub fn parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn PayloadDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn build(self) -> Result<Runner, ConstructionError> {
        let callable = self.callable.ok_or(ConstructionError::MissingCallable)?;
        let contract = ArgumentContract::for_callable(callable.as_ref())?;
        let tubes = Tubes::new(self.tubes)?;

        info!(
            callable = callable.name(),
            tubes = %tubes,
            parse = self.parse,
            decoder = self.decoder.name(),
            "runner built"
        );

        Ok(Runner {
            callable,
            contract,
            host: self.host,
            port: self.port,
            tubes,
            parse: self.parse,
            decoder: self.decoder,
            connector: self.connector,
            connection: None,
            state: LoopState::Idle,
        })
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
