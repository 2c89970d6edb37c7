//! Concurrent sync executor
//!
//! Pulls decisions from the comparator and runs every non-trivial one on
//! its own worker thread, with at most `concurrency` operations in flight.
//! A bounded channel acts as the slot pool: a slot is sent before a worker
//! starts and received back when it finishes. Workers report to a single
//! aggregator thread that owns all counters. The aggregator ends once every
//! worker has dropped its sender, so counts are final only after all
//! workers are joined.

use crate::error::{Result, SyncError};
use crate::progress::ProgressReporter;
use crate::sync::{Operation, SyncDecision};
use crossbeam::channel::{bounded, unbounded, Receiver};
use std::thread;
use std::time::{Duration, Instant};

/// Performs the work behind one decision
pub trait DecisionHandler: Send + Sync {
    /// Execute a decision, returning the bytes moved
    fn handle(&self, decision: &SyncDecision) -> Result<u64>;
}

/// Output behaviour of one run
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Suppress all non-error output
    pub quiet: bool,
    /// Print decisions instead of executing them
    pub dry_run: bool,
    /// Show a live progress display
    pub progress: bool,
}

/// Aggregate outcome of a sync or copy run
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Operations that finished
    pub succeeded: u64,
    /// Operations that failed
    pub failed: u64,
    /// Keys that needed no work, vanished, or were only planned
    pub skipped: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Failed keys with their error
    pub failures: Vec<(String, String)>,
    /// Wall time
    pub duration: Duration,
    /// Error that aborted the comparison
    pub fatal: Option<SyncError>,
}

impl SyncReport {
    /// True when nothing failed and nothing aborted
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.fatal.is_none()
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Sync Summary ===");
        println!("Succeeded:   {}", self.succeeded);
        println!("Failed:      {}", self.failed);
        println!("Skipped:     {}", self.skipped);
        println!(
            "Transferred: {}",
            humansize::format_size(self.bytes, humansize::BINARY)
        );
        println!(
            "Duration:    {}",
            humantime::format_duration(Duration::from_millis(self.duration.as_millis() as u64))
        );

        if !self.failures.is_empty() {
            println!("\nFailures: {}", self.failures.len());
            for (key, error) in &self.failures {
                println!("  {} - {}", key, error);
            }
        }
    }

    /// Turn a fatal error into `Err`, keeping the counts otherwise
    pub fn into_result(mut self) -> Result<Self> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

enum Outcome {
    Succeeded { key: String, bytes: u64 },
    Failed { key: String, error: String },
    Vanished { key: String, reason: String },
    Skipped,
    Planned { line: String },
}

/// Releases a slot when the worker finishes, even by panic
struct Slot(Receiver<()>);

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.0.recv();
    }
}

/// Bounded-concurrency executor over a decision stream
pub struct SyncExecutor<'a, H: DecisionHandler> {
    handler: &'a H,
    concurrency: usize,
    output: OutputOptions,
}

impl<'a, H: DecisionHandler> SyncExecutor<'a, H> {
    /// Create an executor running at most `concurrency` operations at once
    pub fn new(handler: &'a H, concurrency: usize, output: OutputOptions) -> Self {
        Self {
            handler,
            concurrency: concurrency.max(1),
            output,
        }
    }

    /// Execute every decision and report the aggregate
    ///
    /// A failed decision pull stops dispatch; operations already running are
    /// drained before the report is returned with `fatal` set.
    pub fn run<I>(&self, decisions: I) -> SyncReport
    where
        I: IntoIterator<Item = Result<SyncDecision>>,
    {
        let start = Instant::now();
        let reporter = if self.output.progress && !self.output.quiet {
            ProgressReporter::new()
        } else {
            ProgressReporter::disabled()
        };
        let quiet = self.output.quiet;

        let (slot_tx, slot_rx) = bounded::<()>(self.concurrency);
        let (result_tx, result_rx) = unbounded::<Outcome>();

        let (mut report, fatal) = thread::scope(|scope| {
            let aggregator = scope.spawn(move || {
                let mut report = SyncReport::default();
                for outcome in result_rx {
                    record(&mut report, outcome, &reporter, quiet);
                }
                reporter.finish();
                report
            });

            let mut fatal = None;
            for decision in decisions {
                let decision = match decision {
                    Ok(decision) => decision,
                    Err(err) => {
                        tracing::error!("Comparison aborted: {}", err);
                        fatal = Some(err);
                        break;
                    }
                };

                let outcome = match decision.operation {
                    Operation::NoOp => Some(Outcome::Skipped),
                    Operation::Error => Some(Outcome::Vanished {
                        key: decision.src_key.clone(),
                        reason: decision.reason.clone().unwrap_or_default(),
                    }),
                    _ if self.output.dry_run => Some(Outcome::Planned {
                        line: dry_run_line(&decision),
                    }),
                    _ => None,
                };
                if let Some(outcome) = outcome {
                    let _ = result_tx.send(outcome);
                    continue;
                }

                // Blocks while `concurrency` workers hold a slot.
                if slot_tx.send(()).is_err() {
                    break;
                }
                let slot = Slot(slot_rx.clone());
                let tx = result_tx.clone();
                let handler = self.handler;
                scope.spawn(move || {
                    let _slot = slot;
                    let _ = tx.send(execute(handler, &decision));
                });
            }

            drop(result_tx);
            let report = aggregator.join().unwrap_or_default();
            (report, fatal)
        });

        report.fatal = fatal;
        report.duration = start.elapsed();
        report
    }
}

fn execute<H: DecisionHandler>(handler: &H, decision: &SyncDecision) -> Outcome {
    let key = if decision.operation.is_transfer() {
        decision.src_key.clone()
    } else {
        decision.dst_key.clone()
    };
    tracing::debug!("{} {}", decision.operation, key);

    match handler.handle(decision) {
        Ok(bytes) => Outcome::Succeeded { key, bytes },
        Err(err) if err.is_vanished() => Outcome::Vanished {
            key,
            reason: err.to_string(),
        },
        Err(err) => Outcome::Failed {
            key,
            error: err.to_string(),
        },
    }
}

fn record(report: &mut SyncReport, outcome: Outcome, reporter: &ProgressReporter, quiet: bool) {
    match outcome {
        Outcome::Succeeded { key, bytes } => {
            report.succeeded += 1;
            report.bytes += bytes;
            reporter.set_current(&key);
            reporter.record_success(bytes);
        }
        Outcome::Failed { key, error } => {
            tracing::error!("{}: {}", key, error);
            report.failed += 1;
            report.failures.push((key, error));
            reporter.record_failure();
        }
        Outcome::Vanished { key, reason } => {
            tracing::warn!("Skipping {}, it disappeared: {}", key, reason);
            report.skipped += 1;
            reporter.record_skip();
        }
        Outcome::Skipped => {
            report.skipped += 1;
            reporter.record_skip();
        }
        Outcome::Planned { line } => {
            report.skipped += 1;
            if !quiet {
                reporter.println(&line);
            }
        }
    }
}

fn dry_run_line(decision: &SyncDecision) -> String {
    let verb = console::style(format!("{:>8}", decision.operation.verb())).cyan();
    match decision.operation {
        Operation::RemoveLocal | Operation::RemoveRemote => {
            format!("(dry run) {} {}", verb, decision.dst_key)
        }
        _ if decision.src_key == decision.dst_key => {
            format!("(dry run) {} {}", verb, decision.src_key)
        }
        _ => format!(
            "(dry run) {} {} -> {}",
            verb, decision.src_key, decision.dst_key
        ),
    }
}
