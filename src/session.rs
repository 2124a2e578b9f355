//! Registry of in-flight measurement sessions.
//!
//! Every operation takes the single table lock for a short critical section.
//! Nothing awaits or allocates large buffers while holding it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::params;
use crate::spec::{ClientResults, ServerResults, ServerSchema};

/// Server-side state of one measurement session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Number of completed downloads.
    pub iteration: i64,
    /// One entry per completed download, in iteration order.
    pub server: Vec<ServerResults>,
    /// Origin for iteration ticks and staleness checks.
    pub created_at: Instant,
    /// Wall-clock creation time, used when persisting.
    pub started: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Session {
            iteration: 0,
            server: Vec::new(),
            created_at: Instant::now(),
            started: Utc::now(),
        }
    }

    /// Build the persisted schema from this session and the client's results.
    pub fn into_schema(self, client: Vec<ClientResults>) -> ServerSchema {
        ServerSchema {
            client,
            server_schema_version: params::SERVER_SCHEMA_VERSION,
            server_timestamp: self.started.timestamp(),
            server: self.server,
        }
    }
}

/// Lifecycle state of a token as seen by the download handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never issued, already collected, or reaped.
    Missing,
    /// May perform more downloads.
    Active,
    /// Reached the iteration cap but not yet collected.
    Expired,
}

/// Concurrent map from session token to [`Session`].
#[derive(Debug)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Session>>,
    max_iterations: i64,
}

impl Default for SessionTable {
    fn default() -> Self {
        SessionTable::new(params::MAX_ITERATIONS)
    }
}

impl SessionTable {
    pub fn new(max_iterations: i64) -> Self {
        SessionTable {
            sessions: Mutex::new(HashMap::new()),
            max_iterations,
        }
    }

    /// Register a fresh session under `token`. Tokens are assumed unique.
    pub fn create(&self, token: impl Into<String>) {
        let session = Session::new();
        self.sessions.lock().insert(token.into(), session);
    }

    pub fn state(&self, token: &str) -> SessionState {
        let sessions = self.sessions.lock();
        match sessions.get(token) {
            None => SessionState::Missing,
            Some(s) if s.iteration >= self.max_iterations => SessionState::Expired,
            Some(_) => SessionState::Active,
        }
    }

    /// Append a server measurement and bump the iteration counter.
    ///
    /// Unknown tokens are ignored. The iteration cap is not enforced here;
    /// callers check [`SessionTable::state`] first.
    pub fn record_iteration(&self, token: &str) {
        let now = Instant::now();
        let timestamp = Utc::now().timestamp();
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(token) {
            session.server.push(ServerResults {
                iteration: session.iteration,
                ticks: now.duration_since(session.created_at).as_secs_f64(),
                timestamp,
            });
            session.iteration += 1;
        }
    }

    /// Remove and return the session, if any.
    pub fn pop(&self, token: &str) -> Option<Session> {
        self.sessions.lock().remove(token)
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Delete every session created more than `max_idle` ago and return how
    /// many were removed. Their results are dropped, not persisted.
    pub fn reap_stale(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let now = Instant::now();
        tracing::debug!("reap_stale: inspecting {} sessions", sessions.len());
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.created_at) <= max_idle);
        let reaped = before - sessions.len();
        tracing::debug!("reap_stale: reaped {} stale sessions", reaped);
        reaped
    }

    /// Spawn the periodic sweep. It runs until `cancel` fires.
    pub fn start_reaper(
        self: &Arc<Self>,
        max_idle: Duration,
        period: Duration,
        cancel: CancellationToken,
    ) -> Reaper {
        let table = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            reaper_loop(table, max_idle, period, token).await;
        });
        Reaper { cancel, handle }
    }
}

async fn reaper_loop(
    table: Arc<SessionTable>,
    max_idle: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("reaper: start");
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                table.reap_stale(max_idle);
            }
        }
    }
    tracing::info!("reaper: done");
}

/// Handle on the background sweep started by [`SessionTable::start_reaper`].
#[derive(Debug)]
pub struct Reaper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Ask the sweep to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until the sweep has exited. No mutation happens after this
    /// returns.
    pub async fn join(self) -> Result<()> {
        self.handle.await?;
        Ok(())
    }
}
