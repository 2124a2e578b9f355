//! Loopback servers for exercising the client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::USER_AGENT;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::server::{self, DashHandler};

/// Run `handler` on an ephemeral loopback port until the token is cancelled.
pub(crate) async fn spawn_dash_server(
    handler: Arc<DashHandler>,
) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(server::serve(listener, handler, cancel.clone()));
    (addr, cancel)
}

/// Answer every request with `status` and `body`.
pub(crate) async fn spawn_stub(status: StatusCode, body: impl Into<Bytes>) -> SocketAddr {
    let body: Bytes = body.into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| {
                    let mut resp = Response::new(Full::new(body.clone()));
                    *resp.status_mut() = status;
                    async move { Ok::<_, Infallible>(resp) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

/// Accept connections and never answer.
pub(crate) async fn spawn_silent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Path and User-Agent of every request seen by a recording server.
pub(crate) type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

/// Path under which the recording server answers Locate queries.
pub(crate) const LOCATE_PATH: &str = "/v2/nearest/neubot/dash";

/// Serve `handler` and a Locate endpoint naming this same server, recording
/// each request.
pub(crate) async fn spawn_recording_server(handler: Arc<DashHandler>) -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let locate = Bytes::from(format!(r#"{{"results":[{{"machine":"{addr}"}}]}}"#));
    let seen = Seen::default();
    let recorded = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((stream, remote)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let locate = locate.clone();
            let seen = Arc::clone(&recorded);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = Arc::clone(&handler);
                    let locate = locate.clone();
                    let ua = req
                        .headers()
                        .get(USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    seen.lock().push((req.uri().path().to_owned(), ua));
                    async move {
                        if req.uri().path() == LOCATE_PATH {
                            return Ok::<_, Infallible>(Response::new(Full::new(locate)));
                        }
                        Ok(handler.route(req, remote).await)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    (addr, seen)
}
