use std::time::{Duration, Instant};

use tracing::Level;

/// Logs the wall time of a scope when dropped.
#[must_use = "the measurement ends when the guard is dropped"]
pub struct Measure {
    name: &'static str,
    level: Level,
    started: Instant,
}

/// Starts measuring `name`; the elapsed time is logged at `level` on drop.
pub fn measure(level: Level, name: &'static str) -> Measure {
    Measure {
        name,
        level,
        started: Instant::now(),
    }
}

impl Measure {
    /// Time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Measure {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1_000.0;
        let name = self.name;
        match self.level {
            Level::ERROR => tracing::error!(name, elapsed_ms, "analysis.measure"),
            Level::WARN => tracing::warn!(name, elapsed_ms, "analysis.measure"),
            Level::INFO => tracing::info!(name, elapsed_ms, "analysis.measure"),
            Level::DEBUG => tracing::debug!(name, elapsed_ms, "analysis.measure"),
            _ => tracing::trace!(name, elapsed_ms, "analysis.measure"),
        }
    }
}
