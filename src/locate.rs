//! M-Lab Locate API client.
//!
//! The Locate API returns the nearest M-Lab servers running the Neubot DASH
//! experiment, closest first.

use crate::error::{DashError, Result};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::collections::HashMap;

/// Default URL of the M-Lab Locate v2 API for the DASH experiment.
pub const LOCATE_URL: &str = "https://locate.measurementlab.net/v2/nearest/neubot/dash";

/// A single M-Lab server returned by the Locate API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Target {
    /// FQDN of the server machine.
    pub machine: String,
    /// Map of service key to full URL.
    #[serde(default)]
    pub urls: HashMap<String, String>,
}

/// Top-level response from the Locate API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocateResponse {
    /// Ordered list of nearby servers (closest first).
    #[serde(default)]
    pub results: Vec<Target>,
}

/// Query `locate_url` for the nearest servers.
///
/// Returns [`DashError::NoCapacity`] when the Locate API responds with
/// 204 (M-Lab is out of capacity).
pub async fn nearest(
    http: &reqwest::Client,
    locate_url: &str,
    user_agent: &str,
) -> Result<Vec<Target>> {
    tracing::debug!("locate: GET {locate_url}");
    let response = http
        .get(locate_url)
        .header(USER_AGENT, user_agent)
        .send()
        .await?
        .error_for_status()?;

    if response.status() == reqwest::StatusCode::NO_CONTENT {
        return Err(DashError::NoCapacity);
    }

    let locate: LocateResponse = response.json().await?;
    Ok(locate.results)
}
