//! Output formatting for test events.
//!
//! The [`Emitter`] trait defines callbacks for each stage of a test run.
//! Two implementations are provided:
//! - [`HumanReadableEmitter`]: per-iteration progress and a formatted summary.
//! - [`JsonEmitter`]: one JSON object per line, suitable for machine consumption.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::spec::{ClientResults, ServerResults};
use crate::summary::{Summary, speed_kbps};

#[derive(Serialize)]
#[serde(tag = "type")]
enum Event<'a> {
    Starting { server: &'a str },
    Error { error: &'a str },
    Iteration { result: &'a ClientResults },
    ServerResults { results: &'a [ServerResults] },
    Summary { summary: &'a Summary },
}

/// Callbacks for DASH test lifecycle events.
pub trait Emitter {
    /// Called once the server is known and the test begins.
    fn on_starting(&mut self, server: &str) -> Result<()>;
    /// Called when the test fails.
    fn on_error(&mut self, err: &str) -> Result<()>;
    /// Called for each completed download.
    fn on_iteration(&mut self, r: &ClientResults) -> Result<()>;
    /// Called with what the server measured, after collection.
    fn on_server_results(&mut self, results: &[ServerResults]) -> Result<()>;
    /// Called after the test completes, with the final summary.
    fn on_summary(&mut self, s: &Summary) -> Result<()>;
}

/// Emits human-readable progress and results to a writer.
pub struct HumanReadableEmitter<W: Write> {
    out: W,
}

impl<W: Write> HumanReadableEmitter<W> {
    /// Create a new emitter writing to `out`.
    pub fn new(out: W) -> Self {
        HumanReadableEmitter { out }
    }
}

impl<W: Write> Emitter for HumanReadableEmitter<W> {
    fn on_starting(&mut self, server: &str) -> Result<()> {
        writeln!(self.out, "DASH test in progress with {server}")?;
        Ok(())
    }

    fn on_error(&mut self, err: &str) -> Result<()> {
        writeln!(self.out, "\nDASH test failed: {err}")?;
        Ok(())
    }

    fn on_iteration(&mut self, r: &ClientResults) -> Result<()> {
        write!(
            self.out,
            "{:>4}: rate {:>7} kbit/s, received {:>9} bytes",
            r.iteration, r.rate, r.received
        )?;
        if let Some(speed) = speed_kbps(r) {
            write!(self.out, ", speed {:>9.1} kbit/s", speed)?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    fn on_server_results(&mut self, results: &[ServerResults]) -> Result<()> {
        writeln!(self.out, "server measured {} iterations", results.len())?;
        Ok(())
    }

    fn on_summary(&mut self, s: &Summary) -> Result<()> {
        writeln!(self.out, "\nTest results\n")?;
        writeln!(self.out, "{:>12}: {}", "Server", s.server_fqdn)?;
        writeln!(self.out, "{:>12}: {}", "Client", s.real_address)?;
        writeln!(self.out, "{:>12}: {}", "Iterations", s.iterations)?;
        writeln!(
            self.out,
            "{:>12}: {:>9.1} kbit/s",
            "Median speed", s.median_speed_kbps
        )?;
        writeln!(
            self.out,
            "{:>12}: {:>9.1} kbit/s",
            "Mean speed", s.mean_speed_kbps
        )?;
        writeln!(self.out, "{:>12}: {:>9} kbit/s", "Last rate", s.last_rate_kbps)?;
        Ok(())
    }
}

/// Emits one JSON object per line for each event.
pub struct JsonEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Create a new JSON emitter writing to `out`.
    pub fn new(out: W) -> Self {
        JsonEmitter { out }
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.out, "{}", json)?;
        Ok(())
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn on_starting(&mut self, server: &str) -> Result<()> {
        self.emit(&Event::Starting { server })
    }

    fn on_error(&mut self, err: &str) -> Result<()> {
        self.emit(&Event::Error { error: err })
    }

    fn on_iteration(&mut self, r: &ClientResults) -> Result<()> {
        self.emit(&Event::Iteration { result: r })
    }

    fn on_server_results(&mut self, results: &[ServerResults]) -> Result<()> {
        self.emit(&Event::ServerResults { results })
    }

    fn on_summary(&mut self, s: &Summary) -> Result<()> {
        self.emit(&Event::Summary { summary: s })
    }
}
