pub type Result<T> = core::result::Result<T, LoadError>;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("tls error for {path}: {reason}")]
    Tls { path: String, reason: String },
    #[error("request provider failed: {0}")]
    Provider(String),
    #[error("{0}")]
    Transport(String),
    #[error("metrics sink is closed")]
    SinkClosed,
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub mod config {
    use serde::Deserialize;
    use std::env;
    use std::path::Path;
    use std::time::Duration;

    use crate::{LoadError, Result};

    pub const CONFIG_ENV: &str = "STREAMLOAD_CONFIG";
    pub const SSL_CERT_ENV: &str = "STREAMLOAD_SSL_CERT";
    pub const REQUEST_TIMEOUT_ENV: &str = "STREAMLOAD_REQUEST_TIMEOUT_MS";
    pub const MAX_CHUNKS_ENV: &str = "STREAMLOAD_MAX_CHUNKS";
    pub const METRICS_BUFFER_ENV: &str = "STREAMLOAD_METRICS_BUFFER";

    /// Per-driver settings, read once at startup.
    ///
    /// Every field is optional and the defaults reproduce a plain driver:
    /// system trust store, no timeout beyond the transport's own, unbounded
    /// chunk recording and an unbounded metrics queue.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct DriverConfig {
        /// Trust setting: blank, a disable token, a CA bundle file or a CA directory.
        pub ssl_cert: Option<String>,
        pub request_timeout_ms: Option<u64>,
        /// Stop recording chunks of one response past this many.
        pub max_chunks: Option<usize>,
        /// Capacity of the metrics queue; `None` means unbounded.
        pub metrics_buffer: Option<usize>,
    }

    impl DriverConfig {
        /// Reads the YAML file named by `STREAMLOAD_CONFIG` when it is set and
        /// the individual `STREAMLOAD_*` variables otherwise.
        ///
        /// A named file that cannot be read or parsed is an error, never a
        /// silent fallback to defaults.
        pub fn load() -> Result<Self> {
            match env::var(CONFIG_ENV) {
                Ok(path) => Self::from_file(path),
                Err(_) => Ok(Self::from_lookup(|key| env::var(key).ok())),
            }
        }

        pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .map_err(|e| LoadError::Config(format!("cannot read {}: {}", path.display(), e)))?;
            Self::from_yaml_str(&text).map_err(|e| LoadError::Config(format!("invalid config {}: {}", path.display(), e)))
        }

        pub fn from_yaml_str(text: &str) -> Result<Self> {
            Ok(serde_yaml::from_str(text)?)
        }

        /// Builds the config from individual variables; unparsable numbers are ignored.
        pub fn from_lookup<F>(lookup: F) -> Self
        where
            F: Fn(&str) -> Option<String>,
        {
            let mut cfg = Self::default();
            cfg.ssl_cert = lookup(SSL_CERT_ENV);
            if let Some(v) = lookup(REQUEST_TIMEOUT_ENV).and_then(|v| v.trim().parse().ok()) { cfg.request_timeout_ms = Some(v); }
            if let Some(v) = lookup(MAX_CHUNKS_ENV).and_then(|v| v.trim().parse().ok()) { cfg.max_chunks = Some(v); }
            if let Some(v) = lookup(METRICS_BUFFER_ENV).and_then(|v| v.trim().parse().ok()) { cfg.metrics_buffer = Some(v); }
            cfg
        }

        pub fn request_timeout(&self) -> Option<Duration> {
            self.request_timeout_ms.map(Duration::from_millis)
        }
    }
}
