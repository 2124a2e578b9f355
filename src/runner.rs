//! DASH test implementation.
//!
//! Negotiates a session, downloads a fixed number of segments whose size
//! follows the throughput measured on the previous one, then submits the
//! client results and receives the server's.

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::error::{DashError, Result};
use crate::params;
use crate::spec::{ClientResults, NegotiateRequest, NegotiateResponse, ServerResults};

/// Bytes to request so that a segment lasts `elapsed_target` seconds at
/// `rate` kbit/s.
pub fn desired_bytes(rate: i64, elapsed_target: i64) -> i64 {
    rate.wrapping_mul(1000).wrapping_mul(elapsed_target) >> 3
}

/// Rate in kbit/s measured by downloading `received` bytes in `elapsed`
/// seconds, truncated.
///
/// Not guarded against `elapsed == 0.0`: the quotient is infinite and the
/// cast saturates. The server clamps whatever size follows from it.
pub fn next_rate(received: i64, elapsed: f64) -> i64 {
    let mut speed = received as f64 / elapsed;
    speed *= 8.0; // bit/s
    speed /= 1000.0; // kbit/s
    speed as i64
}

/// One run of the test against a single server.
pub(crate) struct Runner {
    http: reqwest::Client,
    base: Url,
    user_agent: String,
    iterations: i64,
    begin: Instant,
    client_results: Vec<ClientResults>,
}

impl Runner {
    pub(crate) fn new(
        http: reqwest::Client,
        base: Url,
        user_agent: String,
        iterations: i64,
    ) -> Self {
        Runner {
            http,
            base,
            user_agent,
            iterations,
            begin: Instant::now(),
            client_results: Vec::new(),
        }
    }

    /// Obtain a session token. An empty token or a zero `unchoked` means the
    /// server cannot take us now.
    pub(crate) async fn negotiate(&self) -> Result<NegotiateResponse> {
        let url = self.base.join(params::NEGOTIATE_PATH)?;
        let body = NegotiateRequest {
            dash_rates: params::DEFAULT_RATES.to_vec(),
        };
        tracing::debug!("dash: POST {url}");
        let response = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .header(AUTHORIZATION, "")
            .json(&body)
            .send()
            .await?;
        tracing::debug!("dash: StatusCode: {}", response.status());
        if response.status() != StatusCode::OK {
            return Err(DashError::HttpStatus(response.status()));
        }
        let data = response.bytes().await?;
        tracing::debug!("dash: body: {}", String::from_utf8_lossy(&data));
        let negotiated: NegotiateResponse = serde_json::from_slice(&data)?;
        if negotiated.authorization.is_empty() || negotiated.unchoked == 0 {
            return Err(DashError::ServerBusy);
        }
        tracing::debug!("dash: authorization: {}", negotiated.authorization);
        Ok(negotiated)
    }

    /// Download one segment sized after `current.rate` and store what was
    /// measured into `current`.
    ///
    /// Elapsed time spans from sending the request to reading the last body
    /// byte; header overhead is not accounted for.
    pub(crate) async fn download(
        &self,
        authorization: &str,
        current: &mut ClientResults,
    ) -> Result<()> {
        let nbytes = desired_bytes(current.rate, current.elapsed_target);
        let url = self
            .base
            .join(&format!("{}{}", params::DOWNLOAD_PATH, nbytes))?;
        tracing::debug!("dash: GET {url}");
        current.server_url = url.to_string();
        let saved_ticks = Instant::now();
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;
        tracing::debug!("dash: StatusCode: {}", response.status());
        if response.status() != StatusCode::OK {
            return Err(DashError::HttpStatus(response.status()));
        }
        let data = response.bytes().await?;
        current.elapsed = saved_ticks.elapsed().as_secs_f64();
        current.received = data.len() as i64;
        current.request_ticks = saved_ticks.duration_since(self.begin).as_secs_f64();
        current.timestamp = Utc::now().timestamp();
        Ok(())
    }

    /// Submit every client result and return what the server measured.
    pub(crate) async fn collect(&self, authorization: &str) -> Result<Vec<ServerResults>> {
        let url = self.base.join(params::COLLECT_PATH)?;
        tracing::debug!("dash: POST {url}");
        let response = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .header(AUTHORIZATION, authorization)
            .json(&self.client_results)
            .send()
            .await?;
        tracing::debug!("dash: StatusCode: {}", response.status());
        if response.status() != StatusCode::OK {
            return Err(DashError::HttpStatus(response.status()));
        }
        let data = response.bytes().await?;
        tracing::debug!("dash: body: {}", String::from_utf8_lossy(&data));
        Ok(serde_json::from_slice(&data)?)
    }

    /// Negotiate, download, collect. Every completed iteration is sent on
    /// `tx` as soon as it is measured.
    pub(crate) async fn run(
        mut self,
        tx: mpsc::UnboundedSender<ClientResults>,
    ) -> Result<Vec<ServerResults>> {
        let negotiated = self.negotiate().await?;
        let mut current = ClientResults {
            elapsed_target: params::ELAPSED_TARGET,
            platform: std::env::consts::OS.into(),
            rate: params::INITIAL_RATE,
            real_address: negotiated.real_address.clone(),
            version: params::MAGIC_VERSION.into(),
            ..Default::default()
        };
        while current.iteration < self.iterations {
            self.download(&negotiated.authorization, &mut current)
                .await?;
            self.client_results.push(current.clone());
            let _ = tx.send(current.clone());
            current.iteration += 1;
            current.rate = next_rate(current.received, current.elapsed);
        }
        self.collect(&negotiated.authorization).await
    }
}
