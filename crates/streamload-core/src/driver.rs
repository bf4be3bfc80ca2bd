//! The virtual-user request loop
//!
//! A [`RequestDriver`] owns one tokio task that repeats
//! **params -> POST -> stream -> publish** until it is asked to stop:
//!
//! 1. Ask the [`RequestProvider`] for the next [`RequestParams`](crate::RequestParams)
//! 2. POST the JSON body with one long-lived `reqwest::Client`
//! 3. On 200, stamp every body chunk with [`clock::monotonic`] as it arrives
//! 4. Publish exactly one terminal [`MetricEvent`] to the [`MetricsSink`]
//!
//! Nothing that happens inside an iteration ends the loop. Non-200 responses
//! become `Failure` events, transport and provider errors become `Error`
//! events, and the next iteration starts right away with no retry or backoff.
//!
//! Stopping is cooperative. The `active` flag is checked between iterations
//! only, so an in-flight request always finishes (or fails) before the loop
//! exits. The completion signal is a `watch` channel that flips to
//! [`DriverState::Stopped`] once, after the client and sink are dropped.
//!
//! # Example
//!
//! ```ignore
//! let (sink, mut events) = metrics_channel(None);
//! let driver = RequestDriver::start(
//!     0,
//!     Arc::new(StaticProvider::new(params)),
//!     Arc::new(sink),
//!     TransportTls::from_setting(None),
//!     DriverOptions::default(),
//! )?;
//! let first = events.recv().await;
//! driver.stop().await;
//! ```

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use streamload_common::config::DriverConfig;
use streamload_common::{LoadError, Result};
use tokio::sync::watch;
use tokio_stream::StreamExt as _;

use crate::clock;
use crate::event::{FailureRecord, MetricEvent, SuccessRecord};
use crate::provider::RequestProvider;
use crate::sink::MetricsSink;
use crate::tls::{TlsMode, TransportTls};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Whole-request timeout, body included. `None` leaves only the transport defaults.
    pub request_timeout: Option<Duration>,
    /// Record at most this many chunks per response; later chunks are read and discarded.
    pub max_chunks: Option<usize>,
}

impl DriverOptions {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self { request_timeout: config.request_timeout(), max_chunks: config.max_chunks }
    }
}

/// Handle to a running virtual user.
///
/// Dropping the handle asks the loop to stop but does not wait for it.
#[derive(Debug)]
pub struct RequestDriver {
    user_id: usize,
    active: Arc<AtomicBool>,
    state: watch::Receiver<DriverState>,
}

impl RequestDriver {
    /// Builds the HTTP client and spawns the loop on the current tokio runtime.
    ///
    /// # Errors
    /// Returns an error only if no HTTP client can be built at all. A client
    /// that fails to build with the custom TLS setup falls back to default
    /// verification instead.
    pub fn start(
        user_id: usize,
        provider: Arc<dyn RequestProvider>,
        sink: Arc<dyn MetricsSink>,
        tls: TransportTls,
        options: DriverOptions,
    ) -> Result<Self> {
        let client = build_client(&tls, &options)?;
        let active = Arc::new(AtomicBool::new(true));
        let (state_tx, state) = watch::channel(DriverState::Running);

        let worker = Worker {
            user_id,
            client,
            provider,
            sink,
            active: active.clone(),
            max_chunks: options.max_chunks,
        };

        streamload_obs::driver_started();
        tokio::spawn(async move {
            worker.run().await;
            streamload_obs::driver_stopped();
            state_tx.send_replace(DriverState::Stopped);
        });

        Ok(Self { user_id, active, state })
    }

    /// Same as [`start`](Self::start), with TLS and options taken from `config`.
    pub fn from_config(
        user_id: usize,
        provider: Arc<dyn RequestProvider>,
        sink: Arc<dyn MetricsSink>,
        config: &DriverConfig,
    ) -> Result<Self> {
        let tls = TransportTls::from_setting(config.ssl_cert.as_deref());
        Self::start(user_id, provider, sink, tls, DriverOptions::from_config(config))
    }

    pub fn user_id(&self) -> usize {
        self.user_id
    }

    /// Clears the active flag without waiting.
    pub fn request_stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Clears the active flag and waits until the loop has exited.
    ///
    /// Safe to call repeatedly and from several tasks at once.
    pub async fn stop(&self) {
        self.request_stop();
        self.stopped().await;
    }

    /// Waits for the loop to exit without asking it to.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // An error means the task ended without signalling (it panicked); it is gone either way.
        let _ = state.wait_for(|s| *s == DriverState::Stopped).await;
    }

    pub fn state(&self) -> DriverState {
        if self.state.has_changed().is_err() {
            return DriverState::Stopped;
        }
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == DriverState::Stopped
    }
}

impl Drop for RequestDriver {
    fn drop(&mut self) {
        self.request_stop();
    }
}

struct Worker {
    user_id: usize,
    client: Client,
    provider: Arc<dyn RequestProvider>,
    sink: Arc<dyn MetricsSink>,
    active: Arc<AtomicBool>,
    max_chunks: Option<usize>,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(target: "driver", user_id = self.user_id, "driver started");
        while self.active.load(Ordering::Acquire) {
            self.attempt().await;
            // Attempts that fail without I/O would otherwise never yield.
            tokio::task::yield_now().await;
        }
        tracing::debug!(target: "driver", user_id = self.user_id, "driver stopped");
    }

    async fn attempt(&self) {
        let params = match self.provider.request_params() {
            Ok(params) => params,
            Err(e) => {
                tracing::error!(target: "driver", user_id = self.user_id, error = %e, "request provider failed");
                self.emit(MetricEvent::error(self.user_id, e.to_string())).await;
                return;
            }
        };

        let mut request = self.client.post(&params.url);
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let request = request.json(&params.body);

        let start_time = clock::monotonic();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = error_chain(&e);
                tracing::error!(target: "driver", user_id = self.user_id, url = %params.url, error = %message, "request failed");
                self.emit(MetricEvent::error(self.user_id, message)).await;
                return;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let end_time = clock::monotonic();
            let timestamp = clock::timestamp_seconds();
            self.emit(MetricEvent::Failure(FailureRecord {
                user_id: self.user_id,
                timestamp,
                start_time,
                end_time,
                status_code: status.as_u16(),
            }))
            .await;
            let text = response.text().await.unwrap_or_else(|e| format!("<body unavailable: {e}>"));
            tracing::info!(target: "driver", user_id = self.user_id, status = status.as_u16(), body = %text, "request failure");
            return;
        }

        let (result_chunks, chunk_timestamps) = self.stream_body(response).await;
        let end_time = clock::monotonic();
        let timestamp = clock::timestamp_seconds();
        self.emit(MetricEvent::Success(SuccessRecord {
            user_id: self.user_id,
            result_chunks,
            num_input_tokens: params.input_meta.num_input_tokens,
            timestamp,
            chunk_timestamps,
            start_time,
            end_time,
            status_code: status.as_u16(),
        }))
        .await;
    }

    /// Collects chunks and their arrival times. A body error is published as
    /// an `Error` event and whatever arrived before it is returned.
    async fn stream_body(&self, response: Response) -> (Vec<Bytes>, Vec<f64>) {
        let mut chunks = Vec::new();
        let mut stamps = Vec::new();
        let mut capped = false;

        let body = response.bytes_stream();
        tokio::pin!(body);
        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => {
                    let at = clock::monotonic();
                    if self.max_chunks.is_some_and(|max| chunks.len() >= max) {
                        if !capped {
                            tracing::warn!(target: "driver", user_id = self.user_id, max_chunks = chunks.len(), "chunk limit reached; discarding the rest of the body");
                            capped = true;
                        }
                        continue;
                    }
                    stamps.push(at);
                    chunks.push(chunk);
                }
                Err(e) => {
                    let message = error_chain(&e);
                    tracing::error!(target: "driver", user_id = self.user_id, chunks = chunks.len(), error = %message, "response stream failed");
                    self.emit(MetricEvent::error(self.user_id, message)).await;
                    break;
                }
            }
        }

        streamload_obs::record_chunks(chunks.len());
        (chunks, stamps)
    }

    async fn emit(&self, event: MetricEvent) {
        let outcome = event.outcome();
        if let Err(e) = self.sink.publish(event).await {
            tracing::warn!(target: "driver", user_id = self.user_id, outcome, error = %e, "dropping metric event");
            return;
        }
        streamload_obs::record_outcome(outcome);
    }
}

fn build_client(tls: &TransportTls, options: &DriverOptions) -> Result<Client> {
    let with_timeout = |builder: ClientBuilder| match options.request_timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    };

    match with_timeout(tls.client_builder()).build() {
        Ok(client) => Ok(client),
        Err(e) if *tls.mode() != TlsMode::Default => {
            tracing::error!(target: "tls", error = %error_chain(&e), "failed to apply TLS configuration; using default TLS verification");
            with_timeout(TransportTls::default().client_builder())
                .build()
                .map_err(|e| LoadError::Transport(error_chain(&e)))
        }
        Err(e) => Err(LoadError::Transport(error_chain(&e))),
    }
}

/// Display text of an error followed by each distinct source.
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
