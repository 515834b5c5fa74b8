//! CallableRegistry - resolve callables by dotted name.
//!
//! Built during initialization (mutable), read when the runner is constructed
//! (immutable). A name that was never registered fails closed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::Callable;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("callable \"{0}\" is already registered")]
    AlreadyRegistered(String),

    #[error("could not resolve callable \"{0}\"")]
    Unresolvable(String),
}

#[derive(Default)]
pub struct CallableRegistry {
    callables: HashMap<String, Arc<dyn Callable>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self {
            callables: HashMap::new(),
        }
    }

    /// Register under the callable's own name.
    pub fn register(&mut self, callable: Arc<dyn Callable>) -> Result<(), RegistryError> {
        let name = callable.name().to_string();
        if self.callables.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.callables.insert(name, callable);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Callable>, RegistryError> {
        debug!(callable = name, "resolving callable");
        self.callables
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Unresolvable(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}
