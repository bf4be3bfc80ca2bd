//! Request parameters and the providers that produce them

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use streamload_common::{LoadError, Result};

/// Everything needed to issue one request. Produced fresh for every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as a JSON body.
    pub body: serde_json::Value,
    pub input_meta: InputMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMeta {
    pub num_input_tokens: u64,
    /// Provider-specific details the driver passes through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RequestParams {
    pub fn new(url: impl Into<String>, body: serde_json::Value, num_input_tokens: u64) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            body,
            input_meta: InputMeta { num_input_tokens, extra: Default::default() },
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Source of request parameters, called once per driver iteration.
///
/// Implementations may rotate through inputs; they must do so through
/// interior mutability since the driver only holds a shared reference.
pub trait RequestProvider: Send + Sync {
    fn request_params(&self) -> Result<RequestParams>;
}

impl<F> RequestProvider for F
where
    F: Fn() -> Result<RequestParams> + Send + Sync,
{
    fn request_params(&self) -> Result<RequestParams> {
        self()
    }
}

/// Hands out the same parameters every time.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    params: RequestParams,
}

impl StaticProvider {
    pub fn new(params: RequestParams) -> Self { Self { params } }
}

impl RequestProvider for StaticProvider {
    fn request_params(&self) -> Result<RequestParams> {
        Ok(self.params.clone())
    }
}

/// Cycles through a fixed list of parameter sets.
#[derive(Debug)]
pub struct RoundRobinProvider {
    items: Vec<RequestParams>,
    cursor: AtomicUsize,
}

impl RoundRobinProvider {
    pub fn new(items: Vec<RequestParams>) -> Result<Self> {
        if items.is_empty() {
            return Err(LoadError::Config("round robin provider needs at least one request".into()));
        }
        Ok(Self { items, cursor: AtomicUsize::new(0) })
    }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl RequestProvider for RoundRobinProvider {
    fn request_params(&self) -> Result<RequestParams> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.items.len();
        Ok(self.items[i].clone())
    }
}
