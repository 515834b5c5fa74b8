//! ArgumentContract - which payload fields a callable requires and accepts.
//!
//! Derived once, when the runner is built, from the callable's `Signature`.
//! Afterwards it is read-only and checked against every decoded payload.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::{Callable, Signature};

/// Reserved parameter filled with the name of the tube a job came from.
///
/// Only injected when the callable declares it; never required in a payload.
pub const TUBE_FIELD: &str = "__tube__";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("could not read the signature of \"{0}\"")]
    Unintrospectable(String),

    #[error("no arguments expected by \"{0}\"; it could never receive job data")]
    NoArguments(String),
}

/// Result of checking a payload's keys against the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Required parameters absent from the payload, in declaration order.
    Invalid { missing: Vec<String> },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentContract {
    all: Vec<String>,
    required: Vec<String>,
    arbitrary_fields: bool,
}

impl ArgumentContract {
    pub fn for_callable(callable: &dyn Callable) -> Result<Self, ContractError> {
        let name = callable.name();
        let signature = callable
            .signature()
            .ok_or_else(|| ContractError::Unintrospectable(name.to_string()))?;
        Self::from_signature(name, &signature)
    }

    /// `name` is only used in error messages and log records.
    pub fn from_signature(name: &str, signature: &Signature) -> Result<Self, ContractError> {
        debug!(callable = name, "parsing signature");

        let receiver = signature.receiver_name();
        let mut all: Vec<String> = Vec::with_capacity(signature.parameters().len());
        let mut required = Vec::new();

        for param in signature.parameters() {
            if Some(param.name.as_str()) == receiver || all.contains(&param.name) {
                continue;
            }
            all.push(param.name.clone());
            if param.required && param.name != TUBE_FIELD {
                required.push(param.name.clone());
            }
        }

        let arbitrary_fields = signature.accepts_arbitrary_fields();
        if required.is_empty() && !arbitrary_fields {
            return Err(ContractError::NoArguments(name.to_string()));
        }

        debug!(
            callable = name,
            accepts = %all.join(", "),
            expects = %required.join(", "),
            arbitrary_fields,
            "parsed signature"
        );

        Ok(Self {
            all,
            required,
            arbitrary_fields,
        })
    }

    pub fn all_parameters(&self) -> &[String] {
        &self.all
    }

    pub fn required_parameters(&self) -> &[String] {
        &self.required
    }

    pub fn accepts_arbitrary_fields(&self) -> bool {
        self.arbitrary_fields
    }

    pub fn declares(&self, name: &str) -> bool {
        self.all.iter().any(|p| p == name)
    }

    /// Check which required parameters `keys` leaves out.
    ///
    /// A callable with a keyword sink is never rejected here.
    pub fn validate<'a, I>(&self, keys: I) -> Validation
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.arbitrary_fields {
            return Validation::Valid;
        }
        let keys: HashSet<&str> = keys.into_iter().collect();
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|p| !keys.contains(p.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Validation::Valid
        } else {
            Validation::Invalid { missing }
        }
    }

    /// Drop payload fields the callable does not declare.
    ///
    /// Returns the names that were dropped. A no-op for callables that accept
    /// arbitrary fields.
    pub fn retain_declared(&self, fields: &mut Map<String, Value>) -> Vec<String> {
        if self.arbitrary_fields {
            return Vec::new();
        }
        let dropped: Vec<String> = fields
            .keys()
            .filter(|k| !self.declares(k))
            .cloned()
            .collect();
        for key in &dropped {
            fields.remove(key);
        }
        dropped
    }
}
