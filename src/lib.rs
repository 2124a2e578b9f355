//! A [Neubot](https://github.com/neubot/dash) DASH streaming performance test
//! client and server library.
//!
//! The client emulates a video player: it negotiates a session, downloads a
//! sequence of random "segments" whose size follows the throughput measured
//! on the previous one, then submits what it measured and receives what the
//! server measured. The server hands out sessions, generates segments, and
//! stores the combined results of every completed test.
//!
//! # Quick start
//!
//! ```no_run
//! use neubot_dash::client::ClientBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new("my-app", "0.1.0").build()?;
//! let mut run = client.start_download(CancellationToken::new()).await?;
//!
//! while let Some(r) = run.recv().await {
//!     println!("{:?}", r);
//! }
//! let server_results = run.finish().await?;
//! println!("{:?}", server_results);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod emitter;
pub mod error;
pub mod locate;
pub mod params;
pub mod runner;
pub mod segment;
pub mod server;
pub mod session;
pub mod spec;
pub mod store;
pub mod summary;

#[cfg(test)]
mod testutil;
