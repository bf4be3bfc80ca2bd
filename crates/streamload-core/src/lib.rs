//! Core virtual-user driver: TLS setup, request loop, streaming timing and metric events

pub mod clock;
pub mod driver;
pub mod event;
pub mod provider;
pub mod sink;
pub mod tls;

pub use driver::{DriverOptions, DriverState, RequestDriver};
pub use event::MetricEvent;
pub use provider::{InputMeta, RequestParams, RequestProvider, RoundRobinProvider, StaticProvider};
pub use sink::{metrics_channel, ChannelSink, MetricsReceiver, MetricsSink};
pub use tls::{TlsMode, TransportTls};
