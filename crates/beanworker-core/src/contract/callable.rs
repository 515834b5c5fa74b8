//! Callable trait - the target a worker turns jobs into calls of.
//!
//! # Usage
//! ```
//! use beanworker_core::contract::{Arguments, Callable, FnCallable, Signature};
//! use serde_json::json;
//!
//! let greet = FnCallable::new("demo.greet", Signature::new().required("name"), |args: Arguments| async move {
//!     let name = args.get_str("name").unwrap_or("stranger");
//!     println!("Hello, {name}!");
//!     anyhow::Ok(json!(true))
//! });
//! assert_eq!(greet.name(), "demo.greet");
//! ```
//!
//! The return value's truthiness decides between delete and bury; an `Err`
//! buries the job and logs the full error chain.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Signature, TUBE_FIELD};

/// What a callable is invoked with.
#[derive(Debug, Clone, PartialEq)]
pub enum Arguments {
    /// Decoded payload fields, matched against the callable's contract.
    /// Holds `__tube__` when the callable declares it.
    Fields(Map<String, Value>),

    /// The undecoded job body (the runner was built with `parse(false)`).
    Body { body: Vec<u8>, tube: Option<String> },
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Arguments::Fields(fields) => fields.get(name),
            Arguments::Body { .. } => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Arguments::Fields(fields) => Some(fields),
            Arguments::Body { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Arguments::Fields(_) => None,
            Arguments::Body { body, .. } => Some(body),
        }
    }

    /// Tube the job was reserved from, if it was injected.
    pub fn tube(&self) -> Option<&str> {
        match self {
            Arguments::Fields(fields) => fields.get(TUBE_FIELD).and_then(Value::as_str),
            Arguments::Body { tube, .. } => tube.as_deref(),
        }
    }
}

#[async_trait]
pub trait Callable: Send + Sync {
    /// Dotted name used for registry lookups and log records.
    fn name(&self) -> &str;

    /// Declared parameters; `None` when they cannot be described.
    fn signature(&self) -> Option<Signature>;

    async fn call(&self, args: Arguments) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a `Callable`.
pub struct FnCallable<F, Fut> {
    name: String,
    signature: Signature,
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnCallable<F, Fut>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(name: impl Into<String>, signature: Signature, func: F) -> Self {
        Self {
            name: name.into(),
            signature,
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Callable for FnCallable<F, Fut>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> Option<Signature> {
        Some(self.signature.clone())
    }

    async fn call(&self, args: Arguments) -> anyhow::Result<Value> {
        (self.func)(args).await
    }
}
