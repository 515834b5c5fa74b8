//! Signature - the parameter table a callable declares.
//!
//! Callables cannot be introspected at runtime, so each one states its
//! parameters up front:
//!
//! ```
//! use beanworker_core::contract::Signature;
//!
//! // fn greet(name, greeting = "Hello", __tube__ = None)
//! let sig = Signature::new()
//!     .required("name")
//!     .optional("greeting")
//!     .optional("__tube__");
//! assert_eq!(sig.parameters().len(), 3);
//! ```

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    /// `false` when the parameter has a default value.
    pub required: bool,
}

impl Parameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Declared parameters of a callable, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    receiver: Option<String>,
    parameters: Vec<Parameter>,
    arbitrary_fields: bool,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an implicit receiver (e.g. `self` on a bound method).
    ///
    /// The receiver is never filled from a payload and is left out of the
    /// derived contract.
    pub fn receiver(mut self, name: impl Into<String>) -> Self {
        self.receiver = Some(name.into());
        self
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::required(name));
        self
    }

    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::optional(name));
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Accept any payload field, declared or not (a keyword sink).
    pub fn arbitrary_fields(mut self) -> Self {
        self.arbitrary_fields = true;
        self
    }

    pub fn receiver_name(&self) -> Option<&str> {
        self.receiver.as_deref()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn accepts_arbitrary_fields(&self) -> bool {
        self.arbitrary_fields
    }
}
