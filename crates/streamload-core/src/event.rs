//! Metric events published once per request attempt
//!
//! Monotonic fields (`start_time`, `end_time`, `chunk_timestamps`) are seconds
//! from [`crate::clock::monotonic`]; `timestamp` is wall-clock epoch seconds.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricEvent {
    Success(SuccessRecord),
    Failure(FailureRecord),
    Error(ErrorRecord),
}

/// A 200 response whose body was streamed (possibly partially, see the driver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub user_id: usize,
    pub result_chunks: Vec<Bytes>,
    pub num_input_tokens: u64,
    pub timestamp: u64,
    /// One reading per entry of `result_chunks`, in arrival order.
    pub chunk_timestamps: Vec<f64>,
    pub start_time: f64,
    pub end_time: f64,
    pub status_code: u16,
}

/// A non-200 response. The body is never streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub user_id: usize,
    pub timestamp: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub user_id: usize,
    pub message: String,
}

impl MetricEvent {
    pub fn error(user_id: usize, message: impl Into<String>) -> Self {
        MetricEvent::Error(ErrorRecord { user_id, message: message.into() })
    }

    /// Label used for counters and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            MetricEvent::Success(_) => "success",
            MetricEvent::Failure(_) => "failure",
            MetricEvent::Error(_) => "error",
        }
    }

    pub fn user_id(&self) -> usize {
        match self {
            MetricEvent::Success(r) => r.user_id,
            MetricEvent::Failure(r) => r.user_id,
            MetricEvent::Error(r) => r.user_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MetricEvent::Success(_))
    }

    /// `end_time - start_time` for events that carry both.
    pub fn latency(&self) -> Option<f64> {
        match self {
            MetricEvent::Success(r) => Some(r.e2e()),
            MetricEvent::Failure(r) => Some(r.end_time - r.start_time),
            MetricEvent::Error(_) => None,
        }
    }
}

impl SuccessRecord {
    pub fn chunk_count(&self) -> usize {
        self.result_chunks.len()
    }

    pub fn body_len(&self) -> usize {
        self.result_chunks.iter().map(Bytes::len).sum()
    }

    /// Time to first chunk, the transport-level proxy for time to first token.
    pub fn ttft(&self) -> Option<f64> {
        self.chunk_timestamps.first().map(|t| t - self.start_time)
    }

    pub fn e2e(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn inter_chunk_gaps(&self) -> Vec<f64> {
        self.chunk_timestamps.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn mean_inter_chunk(&self) -> Option<f64> {
        let gaps = self.inter_chunk_gaps();
        if gaps.is_empty() {
            return None;
        }
        Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
    }
}
