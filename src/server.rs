//! DASH server.
//!
//! Three endpoints drive a session through its lifecycle:
//!
//! - `POST /negotiate/dash` creates a session and returns its token.
//! - `GET /dash/download/{n}` sends a segment of (clamped) `n` bytes and
//!   records one iteration, until the session reaches the iteration cap.
//! - `POST /collect/dash` removes the session, stores client and server
//!   results, and returns the server results.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::params;
use crate::segment::{self, RandomSegments, SegmentSource};
use crate::session::{Reaper, SessionState, SessionTable};
use crate::spec::{ClientResults, NegotiateResponse};
use crate::store::{FileStore, ResultStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory where results are written.
    pub datadir: PathBuf,
    /// Downloads allowed per session.
    pub max_iterations: i64,
    /// Age after which the reaper drops a session.
    pub max_idle: Duration,
    /// Interval between reaper sweeps.
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            datadir: PathBuf::from("."),
            max_iterations: params::MAX_ITERATIONS,
            max_idle: params::MAX_SESSION_IDLE,
            reap_interval: params::REAP_INTERVAL,
        }
    }
}

enum Endpoint {
    Negotiate,
    Download,
    Collect,
}

fn endpoint(path: &str) -> Option<Endpoint> {
    if path == params::NEGOTIATE_PATH {
        Some(Endpoint::Negotiate)
    } else if path == params::DOWNLOAD_PATH_NO_TRAILING_SLASH
        || path.starts_with(params::DOWNLOAD_PATH)
    {
        Some(Endpoint::Download)
    } else if path == params::COLLECT_PATH {
        Some(Endpoint::Collect)
    } else {
        None
    }
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = code;
    resp
}

fn with_body(content_type: &'static str, data: Bytes) -> Response<Full<Bytes>> {
    let len = data.len();
    let mut resp = Response::new(Full::new(data));
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    resp
}

fn authorization<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Parse the byte count at the end of a download path. An empty suffix
/// means [`params::MIN_SIZE`].
fn requested_size(path: &str) -> std::result::Result<i64, std::num::ParseIntError> {
    let suffix = path
        .strip_prefix(params::DOWNLOAD_PATH_NO_TRAILING_SLASH)
        .unwrap_or(path);
    let suffix = suffix.strip_prefix('/').unwrap_or(suffix);
    if suffix.is_empty() {
        return Ok(params::MIN_SIZE as i64);
    }
    suffix.parse()
}

/// Request handler shared by every connection.
pub struct DashHandler {
    config: ServerConfig,
    sessions: Arc<SessionTable>,
    segments: Arc<dyn SegmentSource>,
    store: Arc<dyn ResultStore>,
}

impl DashHandler {
    /// Handler with random segments and results written below `config.datadir`.
    pub fn new(config: ServerConfig) -> Self {
        let store = FileStore::new(&config.datadir);
        DashHandler::with_parts(config, Arc::new(RandomSegments), Arc::new(store))
    }

    pub fn with_parts(
        config: ServerConfig,
        segments: Arc<dyn SegmentSource>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        DashHandler {
            sessions: Arc::new(SessionTable::new(config.max_iterations)),
            config,
            segments,
            store,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Start sweeping stale sessions until `cancel` fires.
    pub fn start_reaper(&self, cancel: CancellationToken) -> Reaper {
        self.sessions
            .start_reaper(self.config.max_idle, self.config.reap_interval, cancel)
    }

    /// Dispatch a request to the endpoint matching its path.
    pub async fn route<B>(&self, req: Request<B>, remote: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        tracing::debug!("{} {} from {}", req.method(), req.uri().path(), remote);
        match endpoint(req.uri().path()) {
            Some(Endpoint::Negotiate) => self.negotiate(remote),
            Some(Endpoint::Download) => self.download(req).await,
            Some(Endpoint::Collect) => self.collect(req).await,
            None => status(StatusCode::NOT_FOUND),
        }
    }

    /// Create a session for the client at `remote`.
    ///
    /// The rate ladder in the request body is not read: clients may ask for
    /// any size within the server's range.
    pub fn negotiate(&self, remote: SocketAddr) -> Response<Full<Bytes>> {
        let token = Uuid::new_v4().to_string();
        let data = match serde_json::to_vec(&NegotiateResponse {
            authorization: token.clone(),
            queue_pos: 0,
            real_address: remote.ip().to_string(),
            unchoked: 1,
        }) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("negotiate: serialize: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        self.sessions.create(token);
        with_body("application/json", Bytes::from(data))
    }

    /// Send one segment and record the iteration.
    ///
    /// Segments are up to [`params::MAX_SIZE`] random bytes, so they are
    /// generated on the blocking pool.
    pub async fn download<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let token = authorization(&req);
        match self.sessions.state(token) {
            SessionState::Missing => {
                tracing::warn!("download: session missing");
                return status(StatusCode::BAD_REQUEST);
            }
            // Neubot failed with 500 here; 429 tells the client what happened.
            SessionState::Expired => {
                tracing::warn!("download: session expired");
                return status(StatusCode::TOO_MANY_REQUESTS);
            }
            SessionState::Active => {}
        }
        let requested = match requested_size(req.uri().path()) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("download: parse size: {e}");
                return status(StatusCode::BAD_REQUEST);
            }
        };
        let segments = Arc::clone(&self.segments);
        let generated =
            tokio::task::spawn_blocking(move || segment::generate(segments.as_ref(), requested))
                .await;
        let data = match generated {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                tracing::warn!("download: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            Err(e) => {
                tracing::warn!("download: segment task: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        self.sessions.record_iteration(token);
        with_body(params::SEGMENT_CONTENT_TYPE, data)
    }

    /// Finish a session: store both sides' results and return the server's.
    pub async fn collect<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let Some(session) = self.sessions.pop(authorization(&req)) else {
            tracing::warn!("collect: session missing");
            return status(StatusCode::BAD_REQUEST);
        };
        let body = match Limited::new(req.into_body(), params::MAX_COLLECT_BODY)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("collect: read body: {e}");
                return status(StatusCode::BAD_REQUEST);
            }
        };
        let client: Vec<ClientResults> = match serde_json::from_slice(&body) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("collect: parse body: {e}");
                return status(StatusCode::BAD_REQUEST);
            }
        };
        let data = match serde_json::to_vec(&session.server) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("collect: serialize: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        let started = session.started;
        let schema = session.into_schema(client);
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&schema, started)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("collect: save: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            Err(e) => {
                tracing::warn!("collect: save task: {e}");
                return status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        with_body("application/json", Bytes::from(data))
    }
}

/// Accept HTTP/1 connections on `listener` until `cancel` fires.
///
/// Connections already accepted keep running to completion.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<DashHandler>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("listening on {}", listener.local_addr()?);
    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept: {e}");
                    continue;
                }
            },
        };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(handler.route(req, remote).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection from {remote}: {e}");
            }
        });
    }
    tracing::info!("stopped listening");
    Ok(())
}
