//! DASH protocol data types.
//!
//! These structs match the JSON messages exchanged during negotiation and
//! collection, and the schema the server persists for every completed test.

use serde::{Deserialize, Serialize};

/// Body of the negotiation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiateRequest {
    /// Candidate rates in kbit/s. Advisory only; the server ignores them.
    pub dash_rates: Vec<i64>,
}

/// Body of the negotiation response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiateResponse {
    /// Token identifying the session in later requests.
    pub authorization: String,
    /// Position in the server queue. Always zero.
    pub queue_pos: i64,
    /// Client address as seen by the server.
    pub real_address: String,
    /// Nonzero when the server accepts the client right away.
    pub unchoked: i64,
}

/// Results measured by the client for one iteration.
///
/// All fields date back to Neubot's DASH schema except `server_url`, which
/// Measurement Kit added in v0.10.6. Unknown fields are ignored and missing
/// ones default, so older clients can still submit their results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientResults {
    pub connect_time: f64,
    pub delta_sys_time: f64,
    pub delta_user_time: f64,
    /// Seconds spent downloading the segment.
    pub elapsed: f64,
    /// Target duration of the segment in seconds.
    pub elapsed_target: i64,
    pub internal_address: String,
    pub iteration: i64,
    pub platform: String,
    /// Requested rate in kbit/s.
    pub rate: i64,
    pub real_address: String,
    /// Bytes received.
    pub received: i64,
    pub remote_address: String,
    /// Seconds between the start of the test and this request.
    pub request_ticks: f64,
    pub server_url: String,
    /// Unix time (seconds) when the download completed.
    pub timestamp: i64,
    pub uuid: String,
    pub version: String,
}

/// Results measured by the server for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerResults {
    pub iteration: i64,
    /// Seconds elapsed since the session was created.
    pub ticks: f64,
    /// Unix time (seconds) of the measurement.
    pub timestamp: i64,
}

/// Data format historically used by the Neubot server for DASH results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSchema {
    pub client: Vec<ClientResults>,
    #[serde(rename = "srvr_schema_version")]
    pub server_schema_version: i64,
    #[serde(rename = "srvr_timestamp")]
    pub server_timestamp: i64,
    pub server: Vec<ServerResults>,
}
