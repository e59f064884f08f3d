//! Thin progress surfacing: periodic throughput/counter logging via
//! `tracing`, no TTY rendering. Mirrors the teacher's
//! `thousands::Separable`-formatted summary logging in
//! `seqvars::ingest::process_variants`.

use std::time::{Duration, Instant};

use thousands::Separable;

use crate::error::IngestReport;

/// Tracks elapsed time and row count, logging a throughput line no more
/// often than `log_interval`.
pub struct ProgressTracker {
    start: Instant,
    last_logged: Instant,
    log_interval: Duration,
    rows_seen: u64,
}

impl ProgressTracker {
    pub fn new(log_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_logged: now,
            log_interval,
            rows_seen: 0,
        }
    }

    /// Registers `n` additional committed rows, logging a throughput line
    /// if `log_interval` has elapsed since the last one.
    pub fn record_rows(&mut self, n: u64) {
        self.rows_seen += n;
        let now = Instant::now();
        if now.duration_since(self.last_logged) >= self.log_interval {
            self.log(now);
            self.last_logged = now;
        }
    }

    fn log(&self, now: Instant) {
        let elapsed = now.duration_since(self.start).as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.rows_seen as f64 / elapsed
        } else {
            0.0
        };
        tracing::info!(
            rows = self.rows_seen.separate_with_commas(),
            rows_per_sec = format!("{rate:.0}"),
            "ingest progress"
        );
    }

    /// Logs a final summary line, always, regardless of `log_interval`.
    pub fn finish(&self, report: &IngestReport) {
        tracing::info!(
            rows = report.rows_emitted.separate_with_commas(),
            malformed_records = report.malformed_records.separate_with_commas(),
            coercion_failures = report.coercion_failures.separate_with_commas(),
            array_cardinality_mismatches = report.array_cardinality_mismatches.separate_with_commas(),
            elapsed = ?self.start.elapsed(),
            "ingest finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rows_accumulates_total() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(3600));
        tracker.record_rows(10);
        tracker.record_rows(5);
        assert_eq!(tracker.rows_seen, 15);
    }
}
