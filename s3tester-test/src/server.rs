//! Exposes an in-process object store stand-in for use in integration tests.
//!
//! ```
//! use s3tester_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let addr = server.addr();
//!    // point the transport at `addr`...
//! }
//! ```
//!
//! The server answers every request with `200 OK`, or `404 Not Found` for keys starting with
//! `missing`. Connections are kept alive unless the server was created with
//! [`TestServer::closing`] or the client sends `Connection: close`.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::serve::Listener;

#[derive(Debug, Default)]
struct Stats {
    connections: AtomicUsize,
    requests: AtomicUsize,
    paths: Mutex<Vec<String>>,
}

#[derive(Clone, Debug)]
struct AppState {
    stats: Arc<Stats>,
    close_after_response: bool,
}

/// A tokio listener that counts accepted connections.
struct CountingListener {
    inner: tokio::net::TcpListener,
    stats: Arc<Stats>,
}

impl Listener for CountingListener {
    type Io = tokio::net::TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        let accepted = Listener::accept(&mut self.inner).await;
        self.stats.connections.fetch_add(1, Ordering::SeqCst);
        accepted
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Listener::local_addr(&self.inner)
    }
}

async fn head_object(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path().to_owned();
    let key = path.rsplit('/').next().unwrap_or_default();
    let status = if key.starts_with("missing") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };

    state.stats.paths.lock().unwrap().push(path);
    state.stats.requests.fetch_add(1, Ordering::SeqCst);

    let mut response = status.into_response();
    if state.close_after_response {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// An in-process HTTP/1.1 server for use in integration tests.
///
/// It listens on a random available port on localhost and records every connection and request
/// it sees. The server task is aborted when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    stats: Arc<Stats>,
}

impl TestServer {
    /// Starts a server that keeps connections alive.
    pub async fn new() -> Self {
        Self::start(false).await
    }

    /// Starts a server that closes the connection after every response.
    pub async fn closing() -> Self {
        Self::start(true).await
    }

    async fn start(close_after_response: bool) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let stats = Arc::new(Stats::default());
        let app = Router::new().fallback(head_object).with_state(AppState {
            stats: Arc::clone(&stats),
            close_after_response,
        });

        let handle = tokio::spawn({
            let stats = Arc::clone(&stats);
            async move {
                let listener = CountingListener {
                    inner: tokio::net::TcpListener::from_std(listener).unwrap(),
                    stats,
                };
                axum::serve(listener, app).await.unwrap();
            }
        });

        Self {
            handle,
            socket,
            stats,
        }
    }

    /// Returns the socket address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the number of accepted connections.
    pub fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    /// Returns the number of answered requests.
    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    /// Returns the request paths in the order they were received.
    pub fn paths(&self) -> Vec<String> {
        self.stats.paths.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
