use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{DashError, Result};
use crate::runner::Runner;
use crate::spec::{ClientResults, ServerResults};
use crate::{locate, params};

/// Configures a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    client_name: String,
    client_version: String,
    server: Option<String>,
    scheme: String,
    locate_url: String,
    iterations: i64,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        ClientBuilder {
            client_name: client_name.into(),
            client_version: client_version.into(),
            server: None,
            scheme: "https".into(),
            locate_url: locate::LOCATE_URL.into(),
            iterations: params::NUM_ITERATIONS,
            http: None,
        }
    }

    /// Use this server (`host` or `host:port`) instead of asking the Locate API.
    pub fn server(mut self, fqdn: impl Into<String>) -> Self {
        self.server = Some(fqdn.into());
        self
    }

    /// URL scheme, `https` by default.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn locate_url(mut self, locate_url: impl Into<String>) -> Self {
        self.locate_url = locate_url.into();
        self
    }

    /// Number of segments to download.
    pub fn iterations(mut self, iterations: i64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Client> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .user_agent(user_agent(&self.client_name, &self.client_version))
                .build()?,
        };
        Ok(Client {
            client_name: self.client_name,
            client_version: self.client_version,
            server: self.server,
            scheme: self.scheme,
            locate_url: self.locate_url,
            iterations: self.iterations,
            http,
        })
    }
}

/// DASH test client. Each call to [`Client::start_download`] is an
/// independent run.
#[derive(Debug, Clone)]
pub struct Client {
    pub client_name: String,
    pub client_version: String,
    server: Option<String>,
    scheme: String,
    locate_url: String,
    iterations: i64,
    http: reqwest::Client,
}

impl Client {
    /// Ask the Locate API for the nearest server and return its FQDN.
    pub async fn locate_server(&self) -> Result<String> {
        let targets = locate::nearest(&self.http, &self.locate_url, &self.user_agent()).await?;
        let target = targets.into_iter().next().ok_or(DashError::NoTargets)?;
        Ok(target.machine)
    }

    /// Resolve the server and start the test in the background.
    ///
    /// Fails without starting anything if `cancel` already fired or no
    /// server can be found. Cancelling later aborts any in-flight request
    /// and ends the run with [`DashError::Cancelled`].
    pub async fn start_download(&self, cancel: CancellationToken) -> Result<TestRun> {
        if cancel.is_cancelled() {
            return Err(DashError::Cancelled);
        }
        let fqdn = match &self.server {
            Some(server) => server.clone(),
            None => {
                tracing::debug!("dash: discovering server with locate");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DashError::Cancelled),
                    fqdn = self.locate_server() => fqdn?,
                }
            }
        };
        if cancel.is_cancelled() {
            return Err(DashError::Cancelled);
        }
        tracing::debug!("dash: using server: {fqdn}");
        let base = Url::parse(&format!("{}://{}", self.scheme, fqdn))?;
        let runner = Runner::new(self.http.clone(), base, self.user_agent(), self.iterations);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(DashError::Cancelled),
                outcome = runner.run(tx) => outcome,
            }
        });
        Ok(TestRun {
            server_fqdn: fqdn,
            rx,
            task,
        })
    }

    fn user_agent(&self) -> String {
        user_agent(&self.client_name, &self.client_version)
    }
}

fn user_agent(client_name: &str, client_version: &str) -> String {
    format!(
        "{}/{} {}/{}",
        client_name,
        client_version,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// A running test.
///
/// Yields each iteration's [`ClientResults`] as it completes. The outcome of
/// the run, with the server's results on success, is only available from
/// [`TestRun::finish`] once every result has been consumed.
#[derive(Debug)]
pub struct TestRun {
    server_fqdn: String,
    rx: mpsc::UnboundedReceiver<ClientResults>,
    task: JoinHandle<Result<Vec<ServerResults>>>,
}

impl TestRun {
    /// Server the test runs against.
    pub fn server_fqdn(&self) -> &str {
        &self.server_fqdn
    }

    /// Next completed iteration, or `None` once the run is over.
    pub async fn recv(&mut self) -> Option<ClientResults> {
        self.rx.recv().await
    }

    /// Drain what is left and return the outcome of the run.
    ///
    /// Results yielded before a failure remain valid.
    pub async fn finish(mut self) -> Result<Vec<ServerResults>> {
        while self.rx.recv().await.is_some() {}
        self.task.await?
    }
}

impl Stream for TestRun {
    type Item = ClientResults;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use reqwest::StatusCode;

    use super::*;
    use crate::server::{DashHandler, ServerConfig};
    use crate::testutil::{
        LOCATE_PATH, spawn_dash_server, spawn_recording_server, spawn_silent, spawn_stub,
    };

    fn local_client(addr: std::net::SocketAddr, iterations: i64) -> Client {
        ClientBuilder::new("dash-client-test", "0.1.0")
            .server(addr.to_string())
            .scheme("http")
            .iterations(iterations)
            .build()
            .unwrap()
    }

    #[test]
    fn user_agent_names_library() {
        let client = ClientBuilder::new("my-app", "1.2.3").build().unwrap();
        let ua = client.user_agent();
        assert!(ua.starts_with("my-app/1.2.3 neubot-dash/"));
    }

    #[tokio::test]
    async fn every_request_carries_user_agent() {
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: tempfile::tempdir().unwrap().keep(),
            ..Default::default()
        }));
        let (addr, seen) = spawn_recording_server(handler).await;

        let client = ClientBuilder::new("my-app", "1.2.3")
            .scheme("http")
            .locate_url(format!("http://{addr}{LOCATE_PATH}"))
            .iterations(2)
            .build()
            .unwrap();
        let run = client.start_download(CancellationToken::new()).await.unwrap();
        assert_eq!(run.finish().await.unwrap().len(), 2);

        let seen = seen.lock();
        let paths: Vec<&str> = seen.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(paths.len(), 5);
        assert_eq!(paths[0], LOCATE_PATH);
        assert_eq!(paths[1], "/negotiate/dash");
        assert_eq!(paths[2], "/dash/download/750000");
        assert!(paths[3].starts_with("/dash/download/"));
        assert_eq!(paths[4], "/collect/dash");
        for (path, ua) in seen.iter() {
            let ua = ua.as_deref().unwrap_or_default();
            assert!(ua.starts_with("my-app/1.2.3 neubot-dash/"), "{path}: {ua:?}");
        }
    }

    #[tokio::test]
    async fn injected_http_client_still_sends_user_agent() {
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: tempfile::tempdir().unwrap().keep(),
            ..Default::default()
        }));
        let (addr, seen) = spawn_recording_server(handler).await;

        let client = ClientBuilder::new("my-app", "1.2.3")
            .locate_url(format!("http://{addr}{LOCATE_PATH}"))
            .http_client(reqwest::Client::new())
            .build()
            .unwrap();
        assert_eq!(client.locate_server().await.unwrap(), addr.to_string());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let ua = seen[0].1.as_deref().unwrap_or_default();
        assert!(ua.starts_with("my-app/1.2.3 neubot-dash/"));
    }

    #[tokio::test]
    async fn full_run_against_local_server() {
        let datadir = tempfile::tempdir().unwrap();
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: datadir.path().to_path_buf(),
            ..Default::default()
        }));
        let (addr, stop) = spawn_dash_server(Arc::clone(&handler)).await;

        let client = local_client(addr, 4);
        let mut run = client.start_download(CancellationToken::new()).await.unwrap();
        assert_eq!(run.server_fqdn(), addr.to_string());

        let mut results = Vec::new();
        while let Some(r) = run.recv().await {
            results.push(r);
        }
        let server = run.finish().await.unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(server.len(), 4);
        for (i, (c, s)) in results.iter().zip(&server).enumerate() {
            assert_eq!(c.iteration, i as i64);
            assert_eq!(s.iteration, i as i64);
            assert_eq!(c.platform, std::env::consts::OS);
        }
        assert_eq!(handler.sessions().count(), 0);

        // One gzip file per collected session.
        let files = walk(datadir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(".json.gz"));
        stop.cancel();
    }

    fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
        files
    }

    #[tokio::test]
    async fn results_as_stream() {
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: tempfile::tempdir().unwrap().keep(),
            ..Default::default()
        }));
        let (addr, stop) = spawn_dash_server(handler).await;
        let run = local_client(addr, 2)
            .start_download(CancellationToken::new())
            .await
            .unwrap();
        let iterations: Vec<i64> = run.map(|r| r.iteration).collect().await;
        assert_eq!(iterations, vec![0, 1]);
        stop.cancel();
    }

    #[tokio::test]
    async fn failure_surfaces_after_results() {
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: tempfile::tempdir().unwrap().keep(),
            max_iterations: 1,
            ..Default::default()
        }));
        let (addr, stop) = spawn_dash_server(Arc::clone(&handler)).await;
        let mut run = local_client(addr, 3)
            .start_download(CancellationToken::new())
            .await
            .unwrap();

        let first = run.recv().await.unwrap();
        assert_eq!(first.iteration, 0);
        assert!(run.recv().await.is_none());
        let err = run.finish().await.unwrap_err();
        assert!(matches!(err, DashError::HttpStatus(StatusCode::TOO_MANY_REQUESTS)));

        // Never collected: the session stays until the reaper removes it.
        assert_eq!(handler.sessions().count(), 1);
        stop.cancel();
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = ClientBuilder::new("dash-client-test", "0.1.0")
            .server("127.0.0.1:9")
            .build()
            .unwrap();
        let err = client.start_download(cancel).await.unwrap_err();
        assert!(matches!(err, DashError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_request() {
        let addr = spawn_silent().await;
        let cancel = CancellationToken::new();
        let mut run = local_client(addr, 3)
            .start_download(cancel.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(run.recv().await.is_none());
        assert!(matches!(run.finish().await, Err(DashError::Cancelled)));
    }

    #[tokio::test]
    async fn locate_picks_first_target() {
        let handler = Arc::new(DashHandler::new(ServerConfig {
            datadir: tempfile::tempdir().unwrap().keep(),
            ..Default::default()
        }));
        let (addr, stop) = spawn_dash_server(Arc::clone(&handler)).await;
        let body = format!(r#"{{"results":[{{"machine":"{addr}"}},{{"machine":"127.0.0.1:9"}}]}}"#);
        let locate = spawn_stub(StatusCode::OK, body).await;

        let client = ClientBuilder::new("dash-client-test", "0.1.0")
            .scheme("http")
            .locate_url(format!("http://{locate}/v2/nearest/neubot/dash"))
            .iterations(1)
            .build()
            .unwrap();
        let run = client.start_download(CancellationToken::new()).await.unwrap();
        assert_eq!(run.server_fqdn(), addr.to_string());
        assert_eq!(run.finish().await.unwrap().len(), 1);
        assert_eq!(handler.sessions().count(), 0);
        stop.cancel();
    }

    #[tokio::test]
    async fn locate_without_targets() {
        let locate = spawn_stub(StatusCode::OK, r#"{"results":[]}"#).await;
        let client = ClientBuilder::new("dash-client-test", "0.1.0")
            .locate_url(format!("http://{locate}/"))
            .build()
            .unwrap();
        let err = client
            .start_download(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DashError::NoTargets));
    }

    #[tokio::test]
    async fn locate_out_of_capacity() {
        let locate = spawn_stub(StatusCode::NO_CONTENT, "").await;
        let client = ClientBuilder::new("dash-client-test", "0.1.0")
            .locate_url(format!("http://{locate}/"))
            .build()
            .unwrap();
        let err = client.locate_server().await.unwrap_err();
        assert!(matches!(err, DashError::NoCapacity));
    }

    #[tokio::test]
    #[ignore]
    async fn test_download_real_server() {
        let client = ClientBuilder::new("dash-client-rust", "0.1.0")
            .build()
            .unwrap();
        let mut run = client
            .start_download(CancellationToken::new())
            .await
            .unwrap();

        let mut count = 0;
        println!("connected to {}", run.server_fqdn());
        while let Some(r) = run.recv().await {
            count += 1;
            println!("{:?}", r);
        }
        assert!(count > 0);
        run.finish().await.unwrap();
    }
}
