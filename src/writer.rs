use crate::config::{WRITER_POLL_FACTOR, WRITER_POLL_LOWER, WRITER_POLL_UPPER};
use crate::control::{panic_message, RunControl};
use crate::dictionary::{Dictionary, DictionaryScope};
use crate::queue::{Pop, TermReceiver};
use crate::stats::PipelineStats;
use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll timeout that grows geometrically while the queue is idle and snaps
/// back to the lower bound as soon as an item arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    lower: Duration,
    upper: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(lower: Duration, upper: Duration, factor: f64) -> Self {
        let upper = upper.max(lower);
        Self {
            lower,
            upper,
            factor: factor.max(1.0),
            current: lower,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.lower;
    }

    /// Grows the timeout after an empty poll, capped at the upper bound.
    pub fn next_idle(&mut self) -> Duration {
        self.current = self.current.mul_f64(self.factor).min(self.upper);
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(WRITER_POLL_LOWER, WRITER_POLL_UPPER, WRITER_POLL_FACTOR)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    pub inserted: u64,
    pub failed: u64,
    /// Terms inserted by the final drain after feeding ended
    pub drained: u64,
    /// Terms left in the queue after cancellation, dropped unwritten
    pub discarded: u64,
}

/// The single thread that writes terms into the live dictionary.
///
/// The dictionary is opened inside the writer thread and closed there on
/// every exit path, so the `Dictionary` implementation never needs to be
/// thread-safe.
pub struct DictionaryWriter {
    handle: JoinHandle<Result<WriterSummary>>,
}

impl DictionaryWriter {
    pub fn start<T, D, F>(
        open: F,
        terms: TermReceiver<T>,
        control: Arc<RunControl>,
        stats: Arc<PipelineStats>,
        backoff: Backoff,
    ) -> Result<Self>
    where
        T: Send + 'static,
        D: Dictionary<T>,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("wikiterm-writer".to_string())
            .spawn(move || {
                let dictionary = open().context("Failed to open dictionary for writing")?;
                write_terms(dictionary, &terms, &control, &stats, backoff)
            })
            .context("Failed to spawn dictionary writer")?;
        Ok(Self { handle })
    }

    pub fn join(self) -> Result<WriterSummary> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Dictionary writer thread panicked"))?
    }
}

fn write_terms<T, D: Dictionary<T>>(
    dictionary: D,
    terms: &TermReceiver<T>,
    control: &RunControl,
    stats: &PipelineStats,
    mut backoff: Backoff,
) -> Result<WriterSummary> {
    let mut dictionary = DictionaryScope::new(dictionary);
    let mut summary = WriterSummary::default();

    while control.writer_should_continue() {
        match terms.pop_timeout(backoff.current()) {
            Pop::Item(term) => {
                try_insert(&mut *dictionary, term, &mut summary, stats);
                backoff.reset();
            }
            Pop::Empty => {
                backoff.next_idle();
            }
            Pop::Closed => {
                debug!("Term queue closed by producers");
                break;
            }
        }
    }

    if control.is_canceled() {
        let mut discarded = 0;
        while terms.try_pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            stats.add_discarded(discarded);
            info!(discarded, "Discarded queued terms after cancellation");
        }
        summary.discarded = discarded;
    } else {
        let before = summary.inserted + summary.failed;
        while let Some(term) = terms.try_pop() {
            try_insert(&mut *dictionary, term, &mut summary, stats);
        }
        summary.drained = summary.inserted + summary.failed - before;
    }

    dictionary.finish()?;

    info!(
        inserted = summary.inserted,
        failed = summary.failed,
        drained = summary.drained,
        "Dictionary writer finished"
    );
    Ok(summary)
}

fn try_insert<T, D: Dictionary<T>>(
    dictionary: &mut D,
    term: T,
    summary: &mut WriterSummary,
    stats: &PipelineStats,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| dictionary.add_term(term)));
    let error = match result {
        Ok(Ok(())) => {
            summary.inserted += 1;
            stats.inc_inserted();
            return;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(payload) => panic_message("add_term", payload.as_ref()),
    };
    summary.failed += 1;
    stats.inc_failed_terms();
    warn!(error = %error, "Failed to insert term, continuing");
}
