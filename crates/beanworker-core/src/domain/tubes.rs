//! Tubes - the named queues a worker watches.

use std::fmt;

use serde_yaml::Value;
use thiserror::Error;

/// Tube every beanstalkd connection watches (and uses) when it is opened.
pub const DEFAULT_TUBE: &str = "default";

/// Longest tube name beanstalkd accepts.
pub const MAX_TUBE_NAME: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TubesError {
    #[error("\"tubes\" must be a name or a list of names; received {0}")]
    InvalidType(&'static str),

    #[error("invalid tube name {0:?}")]
    InvalidName(String),
}

/// Non-empty, de-duplicated list of tube names, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tubes(Vec<String>);

impl Tubes {
    pub fn new<I, S>(names: I) -> Result<Self, TubesError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tubes = Vec::new();
        for name in names {
            let name = name.into();
            validate_name(&name)?;
            if !tubes.contains(&name) {
                tubes.push(name);
            }
        }
        if tubes.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self(tubes))
    }

    pub fn single(name: impl Into<String>) -> Result<Self, TubesError> {
        Self::new([name.into()])
    }

    /// Build from a configuration value: a single string or a sequence of strings.
    pub fn from_value(value: &Value) -> Result<Self, TubesError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(name) => Self::single(name.clone()),
            Value::Sequence(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(name) => names.push(name.clone()),
                        other => return Err(TubesError::InvalidType(type_name(other))),
                    }
                }
                Self::new(names)
            }
            other => Err(TubesError::InvalidType(type_name(other))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|t| t == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Tubes {
    fn default() -> Self {
        Self(vec![DEFAULT_TUBE.to_string()])
    }
}

impl fmt::Display for Tubes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.join("\", \""))
    }
}

/// beanstalkd accepts `A-Za-z0-9-+/;.$_()`, at most 200 bytes, no leading hyphen.
fn validate_name(name: &str) -> Result<(), TubesError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TUBE_NAME
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c));
    if valid {
        Ok(())
    } else {
        Err(TubesError::InvalidName(name.to_string()))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
