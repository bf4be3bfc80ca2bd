#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use streamload_core::{MetricEvent, MetricsReceiver, RequestParams, RequestProvider};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::fmt::MakeWriter;

pub const INPUT_TOKENS: u64 = 7;

pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap(); });
    addr
}

/// `POST /generate` answering 200 with `chunks`, one write per chunk, `gap` apart.
pub fn streaming_app(chunks: &'static [&'static str], gap: Duration) -> Router {
    Router::new().route("/generate", post(move || async move {
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(8);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(Bytes::from_static(chunk.as_bytes()))).await.is_err() { return; }
                tokio::time::sleep(gap).await;
            }
        });
        Body::from_stream(ReceiverStream::new(rx))
    }))
}

/// `POST /generate` sending one chunk and then aborting the body.
pub fn aborting_app() -> Router {
    Router::new().route("/generate", post(|| async {
        let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(8);
        tokio::spawn(async move {
            let _ = tx.send(Ok(Bytes::from_static(b"data: partial\n\n"))).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(Err(io::Error::new(io::ErrorKind::Other, "upstream went away"))).await;
        });
        Body::from_stream(ReceiverStream::new(rx))
    }))
}

pub fn status_app(status: StatusCode, body: &'static str) -> Router {
    Router::new().route("/generate", post(move || async move { (status, body) }))
}

/// HTTPS endpoint on 127.0.0.1 answering every request with `200 ok`.
///
/// Its certificate (`localhost`, `127.0.0.1`) is issued by `fixtures/tls-ca/ca.pem`,
/// which is in no system trust store.
pub fn serve_tls() -> SocketAddr {
    let cert = CertificateDer::from(std::fs::read(fixture("tls/server.crt.der")).unwrap());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(std::fs::read(fixture("tls/server.key.der")).unwrap()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    let config = Arc::new(config);

    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let config = config.clone();
            std::thread::spawn(move || answer_tls(config, stream));
        }
    });
    addr
}

fn answer_tls(config: Arc<rustls::ServerConfig>, stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Ok(conn) = rustls::ServerConnection::new(config) else { return };
    let mut tls = rustls::StreamOwned::new(conn, stream);

    // A rejected handshake surfaces here as a read error.
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match tls.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let _ = tls.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok");
    tls.conn.send_close_notify();
    let _ = tls.flush();
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn params_for(addr: SocketAddr) -> RequestParams {
    RequestParams::new(
        format!("http://{}/generate", addr),
        serde_json::json!({"prompt": "Hello", "stream": true}),
        INPUT_TOKENS,
    )
    .with_header("x-test", "driver")
}

/// Provider returning fixed params and counting how often it was asked.
#[derive(Clone)]
pub struct CountingProvider {
    params: RequestParams,
    pub calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(params: RequestParams) -> Self {
        Self { params, calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestProvider for CountingProvider {
    fn request_params(&self) -> streamload_common::Result<RequestParams> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.params.clone())
    }
}

pub async fn next_event(rx: &mut MetricsReceiver) -> MetricEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a metric event")
        .expect("metrics sink closed")
}

/// Reads until every sink handle is gone.
pub async fn drain(rx: &mut MetricsReceiver) -> Vec<MetricEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("sink still open after the driver stopped"),
        }
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("streamload-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs a capturing subscriber for the current thread until the guard drops.
///
/// Tasks spawned on a current-thread runtime log through it too.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

/// Runs `f` with a subscriber that writes into a buffer and returns what was logged.
pub fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let (logs, guard) = capture_logs();
    let out = f();
    drop(guard);
    (out, logs.contents())
}
