//! Progress reporter implementation
//!
//! Uses indicatif for a status spinner showing the key being processed and
//! a counter line with succeeded/failed/skipped totals and throughput. The
//! total is unknown up front because decisions are streamed.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress reporter for sync and copy runs
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Current key
    status: ProgressBar,
    /// Running counters
    counters: ProgressBar,
    /// Start time
    start_time: Instant,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    bytes: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(120));

        let counters = multi.add(ProgressBar::new_spinner());
        counters.set_style(
            ProgressStyle::with_template("{prefix:.bold.dim} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        counters.set_prefix("Sync ");

        Self {
            multi,
            status,
            counters,
            start_time: Instant::now(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.status.disable_steady_tick();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Show the key currently being processed
    pub fn set_current(&self, key: &str) {
        let display = if key.len() > 60 {
            let cut = key.len() - 57;
            let cut = (cut..key.len()).find(|&i| key.is_char_boundary(i)).unwrap_or(cut);
            format!("...{}", &key[cut..])
        } else {
            key.to_string()
        };
        self.status.set_message(display);
    }

    /// Count a finished operation
    pub fn record_success(&self, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.refresh();
    }

    /// Count a failed operation
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }

    /// Count an entry that needed no work
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }

    /// Print a line above the bars without tearing them
    pub fn println(&self, line: &str) {
        if self.is_enabled() {
            let _ = self.multi.println(line);
        } else {
            println!("{}", line);
        }
    }

    fn refresh(&self) {
        let summary = self.summary();
        self.counters.set_message(format!(
            "{} ok, {} failed, {} skipped, {} ({}/s)",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            humansize::format_size(summary.bytes, humansize::BINARY),
            humansize::format_size(summary.throughput as u64, humansize::BINARY)
        ));
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish and clear the bars
    pub fn finish(&self) {
        self.status.finish_and_clear();
        self.counters.finish_and_clear();
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Get progress summary
    pub fn summary(&self) -> ProgressSummary {
        let bytes = self.bytes.load(Ordering::Relaxed);
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        ProgressSummary {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes,
            elapsed,
            throughput: if secs > 0.0 { bytes as f64 / secs } else { 0.0 },
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress summary
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Operations that finished
    pub succeeded: u64,
    /// Operations that failed
    pub failed: u64,
    /// Entries that needed no work
    pub skipped: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Elapsed time
    pub elapsed: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}
