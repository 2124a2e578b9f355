//! Protocol constants and tuning parameters.

use std::time::Duration;

/// URL path used to negotiate a session.
///
/// Lives under `/negotiate` rather than `/dash` because Neubot routed every
/// experiment's negotiation through the `/negotiate` prefix.
pub const NEGOTIATE_PATH: &str = "/negotiate/dash";

/// URL path used to request segments, without the trailing size.
pub const DOWNLOAD_PATH_NO_TRAILING_SLASH: &str = "/dash/download";

/// URL path used to request segments. Append the wanted byte count.
pub const DOWNLOAD_PATH: &str = "/dash/download/";

/// URL path used to submit client measurements.
pub const COLLECT_PATH: &str = "/collect/dash";

/// Version of the persisted server schema. Version 3 is the Neubot one.
pub const SERVER_SCHEMA_VERSION: i64 = 4;

/// Default rate ladder in kbit/s sent at negotiation time.
pub const DEFAULT_RATES: [i64; 20] = [
    100, 150, 200, 250, 300, 400, 500, 700, 900, 1200, 1500, 2000, 2500, 3000, 4000, 5000, 6000,
    7000, 10000, 20000,
];

/// Duration in seconds of every emulated segment.
pub const ELAPSED_TARGET: i64 = 2;

/// Smallest segment the server returns: 100 kbit/s over [`ELAPSED_TARGET`].
pub const MIN_SIZE: usize = 100 * 1000 / 8 * 2;

/// Largest segment the server returns: 30 Mbit/s over [`ELAPSED_TARGET`].
pub const MAX_SIZE: usize = 30000 * 1000 / 8 * 2;

/// Number of downloads a session may perform before it is expired.
pub const MAX_ITERATIONS: i64 = 17;

/// Number of downloads performed by the client.
pub const NUM_ITERATIONS: i64 = 15;

/// Rate of the first request in kbit/s (Netflix's 2017 SD recommendation).
pub const INITIAL_RATE: i64 = 3000;

/// Sessions older than this are removed by the reaper.
pub const MAX_SESSION_IDLE: Duration = Duration::from_secs(60);

/// Interval between two reaper sweeps.
pub const REAP_INTERVAL: Duration = Duration::from_secs(14);

/// Identifies this implementation in the `version` field of client results.
/// `0.007xxxyyy` is Measurement Kit; lower values are Neubot.
pub const MAGIC_VERSION: &str = "0.008000000";

/// Content type of segment payloads.
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp4";

/// Largest collect request body the server reads. Client results for a
/// full run are a few kilobytes.
pub const MAX_COLLECT_BODY: usize = 4 * 1024 * 1024;
