//! Orchestration of one pipeline run.
//!
//! ```text
//! Idle -> Initializing -> Scanning -> Draining -> Optimizing -> Finalizing -> Done
//! ```
//!
//! Scanning starts the writer, the extraction pool and the scanner together.
//! Draining begins as soon as the scanner has joined: the pool finishes its
//! backlog, then the feeding flag is lowered and the writer drains the term
//! queue and exits. Optimization then
//! runs on a fresh dictionary handle, never the writer's. Every path ends in
//! `Done` with exactly one [`PipelineStrategy::on_ended`] call.

use crate::control::{is_canceled, PipelineError, RunControl};
use crate::dictionary::{Dictionary, DictionaryScope};
use crate::parser::WikiSource;
use crate::pool::{ExtractionPool, MessageSink, PoolContext};
use crate::queue::{self, TermSender};
use crate::scanner::{PageScanner, ScanSummary};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::strategy::PipelineStrategy;
use crate::writer::{Backoff, DictionaryWriter};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Initializing,
    Scanning,
    Draining,
    Optimizing,
    Finalizing,
    Done,
}

/// Terminal outcome of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Canceled,
    Failed(anyhow::Error),
}

impl RunOutcome {
    /// Only a cancellation in the error chain reports `Canceled`; a stage
    /// failure stays a failure even if cancellation was requested meanwhile.
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => RunOutcome::Succeeded,
            Err(e) if is_canceled(&e) => RunOutcome::Canceled,
            Err(e) => RunOutcome::Failed(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, RunOutcome::Canceled)
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Canceled => write!(f, "canceled"),
            RunOutcome::Failed(e) => write!(f, "failed: {:#}", e),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
}

pub struct PipelineSupervisor<S: PipelineStrategy> {
    strategy: Arc<S>,
    control: Arc<RunControl>,
    stats: Arc<PipelineStats>,
    state: Mutex<PipelineState>,
    started: AtomicBool,
}

impl<S: PipelineStrategy> PipelineSupervisor<S> {
    pub fn new(strategy: Arc<S>) -> Self {
        Self {
            strategy,
            control: Arc::new(RunControl::new()),
            stats: Arc::new(PipelineStats::new()),
            state: Mutex::new(PipelineState::Idle),
            started: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> &Arc<S> {
        &self.strategy
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        debug!(?state, "Pipeline state changed");
    }

    /// Lets the strategy interrupt its own blocking work, then raises the
    /// cancellation flag. Safe to call from any thread, any number of times.
    pub fn request_cancel(&self) {
        self.strategy.request_cancel();
        if self.control.cancel() {
            info!("Pipeline cancellation requested");
        }
    }

    /// Runs the whole pipeline and reports its outcome. A supervisor runs
    /// once; later calls return a failed report without touching the
    /// strategy.
    pub fn run(&self) -> RunReport {
        if self.started.swap(true, Ordering::SeqCst) {
            return RunReport {
                outcome: RunOutcome::Failed(PipelineError::AlreadyRan.into()),
                elapsed: Duration::ZERO,
                stats: self.stats.snapshot(),
            };
        }

        let start = Instant::now();
        let result = self.execute();
        let elapsed = start.elapsed();
        self.set_state(PipelineState::Done);

        let outcome = RunOutcome::from_result(result);
        info!(
            duration_secs = elapsed.as_secs_f64(),
            outcome = %outcome,
            "Pipeline run finished"
        );
        self.strategy.on_ended(&outcome);

        RunReport {
            outcome,
            elapsed,
            stats: self.stats.snapshot(),
        }
    }

    fn execute(&self) -> Result<()> {
        self.control.check()?;
        self.set_state(PipelineState::Initializing);
        self.strategy
            .initialize_pipeline()
            .context("Failed to initialize pipeline")?;

        self.control.check()?;
        self.extract_terms()?;

        self.control.check()?;
        self.set_state(PipelineState::Optimizing);
        self.optimize_dictionary()?;

        self.control.check()?;
        self.set_state(PipelineState::Finalizing);
        self.strategy
            .perform_last_successful_steps(&self.stats.snapshot())
            .context("Final pipeline steps failed")?;
        Ok(())
    }

    fn extract_terms(&self) -> Result<()> {
        self.set_state(PipelineState::Scanning);
        let source = self
            .strategy
            .wiki_source()
            .context("Failed to open wiki source")?;
        let (terms_tx, terms_rx) = queue::bounded(self.strategy.queue_capacity());

        let feeding = self.control.start_feeding();
        let strategy = Arc::clone(&self.strategy);
        let writer = DictionaryWriter::start(
            move || strategy.create_dictionary(),
            terms_rx,
            Arc::clone(&self.control),
            Arc::clone(&self.stats),
            Backoff::default(),
        )?;

        let fed = self.feed(source, terms_tx);
        feeding.finish();

        // Writer errors first: a dead writer closes the queue and stops upstream stages.
        let written = writer.join().context("Dictionary writer failed")?;
        let scanned = fed?;

        info!(
            pages = scanned.pages_read,
            submitted = scanned.pages_submitted,
            terms = written.inserted,
            failed_terms = written.failed,
            "Term extraction finished"
        );
        Ok(())
    }

    /// Runs the scanner and the pool until both are done. Pool errors take
    /// precedence over scan errors.
    fn feed(&self, source: WikiSource, queue: TermSender<S::Term>) -> Result<ScanSummary> {
        let strategy = Arc::clone(&self.strategy);
        let messages: MessageSink = Arc::new(move |message: &str| strategy.on_message(message));
        let ctx = PoolContext {
            extractor: self.strategy.term_extractor(),
            queue,
            control: Arc::clone(&self.control),
            stats: Arc::clone(&self.stats),
            messages,
        };
        let pool: Arc<dyn ExtractionPool> = Arc::from(
            self.strategy
                .create_pool(ctx)
                .context("Failed to create extraction pool")?,
        );

        let scanner = PageScanner::start(
            source,
            Arc::clone(&pool),
            Arc::clone(&self.control),
            Arc::clone(&self.stats),
            self.strategy.scan_options(),
        )?;
        let scanned = scanner.join();
        self.set_state(PipelineState::Draining);

        let closed = pool.close();
        debug!(processed = pool.processed_pages(), "Extraction pool closed");
        drop(pool);

        closed.context("Extraction pool failed")?;
        scanned.context("Page scanner failed")
    }

    fn optimize_dictionary(&self) -> Result<()> {
        let dictionary = self
            .strategy
            .create_dictionary()
            .context("Failed to open dictionary for optimization")?;
        let mut dictionary = DictionaryScope::new(dictionary);
        dictionary
            .optimize()
            .context("Dictionary optimization failed")?;
        dictionary.finish()
    }
}
