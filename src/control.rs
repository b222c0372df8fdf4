use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;
use tracing::debug;

/// Conditions the pipeline itself raises, as opposed to collaborator failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline run was canceled")]
    Canceled,
    #[error("extraction pool is closed")]
    PoolClosed,
    #[error("term queue is closed")]
    QueueClosed,
    #[error("pipeline supervisor has already run")]
    AlreadyRan,
}

/// Returns true when `err` is, or wraps, a cancellation.
pub fn is_canceled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PipelineError>(),
            Some(PipelineError::Canceled)
        )
    })
}

/// Renders a `catch_unwind` payload as "`who` panicked: message".
pub(crate) fn panic_message(who: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("{} panicked: {}", who, s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("{} panicked: {}", who, s)
    } else {
        format!("{} panicked", who)
    }
}

/// Per-run shared state polled by every stage between units of work.
///
/// `canceled` is set at most once and never cleared. `feeding` is the
/// "more terms may still arrive" flag: raised when the feeding stage starts
/// and cleared exactly once by [`FeedingGuard`].
#[derive(Debug, Default)]
pub struct RunControl {
    canceled: AtomicBool,
    feeding: AtomicBool,
    feeding_stops: AtomicU32,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns true only for the call that actually set the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.canceled.swap(true, Ordering::SeqCst);
        if first {
            debug!("Cancellation flag set");
        }
        first
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_feeding(&self) -> bool {
        self.feeding.load(Ordering::SeqCst)
    }

    /// Continuation predicate for the scanner and the pool.
    pub fn should_continue(&self) -> bool {
        !self.is_canceled()
    }

    /// Continuation predicate for the writer.
    pub fn writer_should_continue(&self) -> bool {
        !self.is_canceled() && self.is_feeding()
    }

    /// Returns `Err(Canceled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_canceled() {
            Err(PipelineError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Raises the feeding flag; the returned guard lowers it when dropped.
    pub fn start_feeding(&self) -> FeedingGuard<'_> {
        self.feeding.store(true, Ordering::SeqCst);
        FeedingGuard { control: self }
    }

    /// How many times the feeding flag went from true to false during this run.
    pub fn feeding_stops(&self) -> u32 {
        self.feeding_stops.load(Ordering::SeqCst)
    }

    fn stop_feeding(&self) {
        if self.feeding.swap(false, Ordering::SeqCst) {
            self.feeding_stops.fetch_add(1, Ordering::SeqCst);
            debug!("Feeding stage ended");
        }
    }
}

/// Lowers the feeding flag on drop, whichever way the feeding stage ends.
pub struct FeedingGuard<'a> {
    control: &'a RunControl,
}

impl FeedingGuard<'_> {
    /// Ends the feeding stage now instead of at scope exit.
    pub fn finish(self) {}
}

impl Drop for FeedingGuard<'_> {
    fn drop(&mut self) {
        self.control.stop_feeding();
    }
}
