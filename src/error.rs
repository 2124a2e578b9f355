use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status: {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("no targets available")]
    NoTargets,
    #[error("locate service is out of capacity")]
    NoCapacity,
    #[error("server busy; try again later")]
    ServerBusy,
    #[error("test cancelled")]
    Cancelled,
    #[error("serialize/deserialize error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("bad service URL: {0}")]
    ServiceUnsupported(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("HTTP server error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("cannot generate segment: {0}")]
    Segment(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DashError>;
