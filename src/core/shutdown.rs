//! Saving multipart progress when the process is told to stop
//!
//! Transfers hold their [`MultipartState`](crate::sync::MultipartState)
//! only while they run, so the flush has to happen from a watcher that
//! fires while they are still in flight.

use crate::error::{Result, SyncError};
use crate::sync::BreakpointBook;
use std::sync::Arc;
use std::thread;

/// Exit status after an interrupt (128 + SIGINT)
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Flush every live breakpoint and exit on SIGINT or SIGTERM
///
/// The handlers are registered before this returns. A watcher thread with
/// its own single-threaded runtime waits for the first signal.
pub fn flush_on_shutdown(book: Arc<BreakpointBook>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SyncError::Config(format!("signal runtime: {}", e)))?;
    let signals = {
        let _guard = runtime.enter();
        Signals::register()?
    };

    thread::Builder::new()
        .name("objsync-signal".to_string())
        .spawn(move || {
            runtime.block_on(signals.recv());
            tracing::warn!("Interrupted, saving transfer progress");
            book.flush_all();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
        .map_err(|e| SyncError::io("objsync-signal", e))?;
    Ok(())
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let install = |kind: SignalKind| {
            signal(kind).map_err(|e| SyncError::Config(format!("signal handler: {}", e)))
        };
        Ok(Self {
            interrupt: install(SignalKind::interrupt())?,
            terminate: install(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Signals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl Signals {
    fn register() -> Result<Self> {
        let ctrl_c = tokio::signal::windows::ctrl_c()
            .map_err(|e| SyncError::Config(format!("signal handler: {}", e)))?;
        Ok(Self { ctrl_c })
    }

    async fn recv(mut self) {
        self.ctrl_c.recv().await;
    }
}
