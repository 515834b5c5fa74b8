//! Worker configuration file.
//!
//! ```yaml
//! callable: demo.greet
//! host: 127.0.0.1
//! port: 11300
//! tubes: [jobs-high, jobs-low]
//! parse: true
//! decoder: yaml
//! timeout: 30
//! log:
//!   level: info
//!   file: /var/log/beanworker.log
//! ```
//!
//! Every key is optional. `tubes` is kept as a raw YAML value so a wrong type
//! surfaces as a construction error rather than a parse error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impls::{DEFAULT_PORT, JsonDecoder, YamlDecoder};
use crate::observability::LogSettings;
use crate::ports::PayloadDecoder;

pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    #[default]
    Yaml,
    Json,
}

impl DecoderKind {
    pub fn decoder(self) -> Arc<dyn PayloadDecoder> {
        match self {
            DecoderKind::Yaml => Arc::new(YamlDecoder),
            DecoderKind::Json => Arc::new(JsonDecoder),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Dotted name looked up in the callable registry.
    pub callable: Option<String>,
    pub host: String,
    pub port: u16,
    /// A tube name or a list of them; absent means `default`.
    pub tubes: Option<serde_yaml::Value>,
    /// Decode bodies and match fields (`true`) or hand over the raw body.
    pub parse: bool,
    pub decoder: DecoderKind,
    /// Seconds to wait for a job before the run ends; absent waits forever.
    pub timeout: Option<u64>,
    pub log: LogSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            callable: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tubes: None,
            parse: true,
            decoder: DecoderKind::default(),
            timeout: None,
            log: LogSettings::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, all-defaults configuration.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}
