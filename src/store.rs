//! Durable storage of completed sessions.
//!
//! Each collected session becomes one gzip-compressed JSON file under
//! `{datadir}/dash/{YYYY}/{MM}/{DD}/`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::Result;
use crate::spec::ServerSchema;

/// Where collected results end up.
pub trait ResultStore: Send + Sync {
    /// Persist `schema` for a session created at `started`.
    fn save(&self, schema: &ServerSchema, started: DateTime<Utc>) -> Result<()>;
}

/// Writes results below a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    datadir: PathBuf,
}

impl FileStore {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        FileStore {
            datadir: datadir.into(),
        }
    }
}

/// Path of the results file for a session created at `started`.
pub fn result_path(datadir: &Path, started: DateTime<Utc>) -> PathBuf {
    datadir
        .join("dash")
        .join(started.format("%Y").to_string())
        .join(started.format("%m").to_string())
        .join(started.format("%d").to_string())
        .join(format!(
            "neubot-dash-{}.json.gz",
            started.format("%Y%m%dT%H%M%S%.9fZ")
        ))
}

impl ResultStore for FileStore {
    fn save(&self, schema: &ServerSchema, started: DateTime<Utc>) -> Result<()> {
        let path = result_path(&self.datadir, started);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Nanosecond names make collisions unlikely; create_new reports them.
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let data = serde_json::to_vec(schema)?;
        let mut zipper = GzEncoder::new(file, Compression::fast());
        zipper.write_all(&data)?;
        zipper.finish()?;
        tracing::debug!("save: wrote {}", path.display());
        Ok(())
    }
}
