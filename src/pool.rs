//! Parallel fan-out stage: applies the term extractor to submitted pages and
//! pushes the resulting terms onto the term queue.
//!
//! Two implementations share one worker loop and differ only in the
//! concurrency primitive that runs it:
//!
//! - [`ThreadPool`] -- dedicated, named `std::thread` workers
//! - [`RayonPool`] -- a private rayon pool whose threads all run the loop via
//!   `spawn_broadcast`
//!
//! Both are scoped resources: [`ExtractionPool::close`] stops intake, lets
//! in-flight pages finish and waits for every worker, and dropping a pool
//! closes it.

use crate::config::{BLOCKING_POLL_INTERVAL, POOL_BACKLOG_PER_WORKER};
use crate::control::{panic_message, PipelineError, RunControl};
use crate::extract::TermExtractor;
use crate::models::WikiPage;
use crate::queue::TermSender;
use crate::stats::PipelineStats;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Receives human-readable progress and per-page failure messages.
pub type MessageSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a pool needs from the run that creates it.
pub struct PoolContext<T> {
    pub extractor: TermExtractor<T>,
    pub queue: TermSender<T>,
    pub control: Arc<RunControl>,
    pub stats: Arc<PipelineStats>,
    pub messages: MessageSink,
}

pub trait ExtractionPool: Send + Sync {
    /// Hands a page to the pool, blocking while the backlog is full.
    fn submit(&self, page: WikiPage) -> Result<()>;

    /// Pages the extractor has run on so far, failed ones included.
    fn processed_pages(&self) -> u64;

    /// False once the pool is closed or its term queue has gone away.
    fn is_accepting(&self) -> bool;

    /// Stops intake and waits for all workers. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Which concurrency primitive backs the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    #[default]
    Threads,
    Rayon,
}

impl PoolKind {
    pub fn create<T: Send + 'static>(
        self,
        ctx: PoolContext<T>,
        workers: usize,
    ) -> Result<Box<dyn ExtractionPool>> {
        let pool: Box<dyn ExtractionPool> = match self {
            PoolKind::Threads => Box::new(ThreadPool::new(ctx, workers)?),
            PoolKind::Rayon => Box::new(RayonPool::new(ctx, workers)?),
        };
        Ok(pool)
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

struct WorkerShared<T> {
    extractor: TermExtractor<T>,
    queue: TermSender<T>,
    control: Arc<RunControl>,
    stats: Arc<PipelineStats>,
    messages: MessageSink,
    processed: AtomicU64,
    queue_closed: AtomicBool,
}

impl<T: Send + 'static> WorkerShared<T> {
    fn new(ctx: PoolContext<T>) -> Self {
        Self {
            extractor: ctx.extractor,
            queue: ctx.queue,
            control: ctx.control,
            stats: ctx.stats,
            messages: ctx.messages,
            processed: AtomicU64::new(0),
            queue_closed: AtomicBool::new(false),
        }
    }

    fn should_continue(&self) -> bool {
        self.control.should_continue() && !self.is_queue_closed()
    }

    fn is_queue_closed(&self) -> bool {
        self.queue_closed.load(Ordering::SeqCst)
    }

    fn run(&self, pages: &Receiver<WikiPage>) {
        for page in pages.iter() {
            if !self.should_continue() {
                break;
            }
            self.process(page);
        }
    }

    fn process(&self, page: WikiPage) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.extractor)(&page)));
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.inc_processed();

        let terms = match result {
            Ok(Ok(terms)) => terms,
            Ok(Err(e)) => {
                self.report_failure(&page, &format!("{:#}", e));
                return;
            }
            Err(payload) => {
                self.report_failure(&page, &panic_message("extractor", payload.as_ref()));
                return;
            }
        };

        for term in terms {
            match self.queue.push(term, &self.control) {
                Ok(()) => self.stats.add_queued(1),
                Err(PipelineError::QueueClosed) => {
                    if !self.queue_closed.swap(true, Ordering::SeqCst) {
                        warn!("Term queue closed, extraction pool stops accepting pages");
                    }
                    return;
                }
                Err(_) => return,
            }
        }
    }

    fn report_failure(&self, page: &WikiPage, reason: &str) {
        self.stats.inc_failed_pages();
        warn!(page_id = page.id, title = %page.title, reason, "Term extraction failed");
        (self.messages)(&format!(
            "Failed to extract terms from page {} ({}): {}",
            page.id, page.title, reason
        ));
    }
}

/// Submission side common to both pool flavours.
struct Intake {
    pages: Mutex<Option<Sender<WikiPage>>>,
}

impl Intake {
    fn new(pages: Sender<WikiPage>) -> Self {
        Self {
            pages: Mutex::new(Some(pages)),
        }
    }

    fn submit<T: Send + 'static>(&self, page: WikiPage, shared: &WorkerShared<T>) -> Result<()> {
        let tx = self
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::PoolClosed)?;

        let mut page = page;
        loop {
            if shared.is_queue_closed() {
                return Err(PipelineError::PoolClosed.into());
            }
            match tx.send_timeout(page, BLOCKING_POLL_INTERVAL) {
                Ok(()) => {
                    shared.stats.inc_submitted();
                    return Ok(());
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    shared.control.check()?;
                    page = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PipelineError::PoolClosed.into())
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the page sender so workers drain the backlog and exit. True on the first call.
    fn close(&self) -> bool {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

/// Pool of dedicated worker threads.
pub struct ThreadPool<T: Send + 'static> {
    shared: Arc<WorkerShared<T>>,
    intake: Intake,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub fn new(ctx: PoolContext<T>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded(workers * POOL_BACKLOG_PER_WORKER);
        let shared = Arc::new(WorkerShared::new(ctx));

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("wikiterm-extract-{}", i))
                .spawn(move || shared.run(&rx))
                .context("Failed to spawn extraction worker")?;
            handles.push(handle);
        }

        debug!(workers, "Thread extraction pool started");

        Ok(Self {
            shared,
            intake: Intake::new(tx),
            workers: Mutex::new(handles),
        })
    }
}

impl<T: Send + 'static> ExtractionPool for ThreadPool<T> {
    fn submit(&self, page: WikiPage) -> Result<()> {
        self.intake.submit(page, &self.shared)
    }

    fn processed_pages(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    fn is_accepting(&self) -> bool {
        self.intake.is_open() && !self.shared.is_queue_closed()
    }

    fn close(&self) -> Result<()> {
        if !self.intake.close() {
            return Ok(());
        }

        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let panicked = handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();

        info!(processed = self.processed_pages(), "Extraction pool closed");
        if panicked > 0 {
            bail!("{} extraction worker(s) panicked", panicked);
        }
        Ok(())
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Extraction pool shut down with errors");
        }
    }
}

/// Sends the worker's exit status when dropped, including during unwinding.
struct DoneSignal {
    tx: Sender<bool>,
    clean: bool,
}

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.clean);
    }
}

/// Pool backed by a private rayon thread pool.
pub struct RayonPool<T: Send + 'static> {
    shared: Arc<WorkerShared<T>>,
    intake: Intake,
    done: Receiver<bool>,
    workers: usize,
    closed: AtomicBool,
    _pool: rayon::ThreadPool,
}

impl<T: Send + 'static> RayonPool<T> {
    pub fn new(ctx: PoolContext<T>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("wikiterm-rayon-{}", i))
            .panic_handler(|_| warn!("Rayon extraction worker panicked"))
            .build()
            .context("Failed to build rayon extraction pool")?;

        let (tx, rx) = crossbeam_channel::bounded(workers * POOL_BACKLOG_PER_WORKER);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(WorkerShared::new(ctx));

        {
            let shared = Arc::clone(&shared);
            pool.spawn_broadcast(move |_| {
                let mut signal = DoneSignal {
                    tx: done_tx.clone(),
                    clean: false,
                };
                shared.run(&rx);
                signal.clean = true;
            });
        }

        debug!(workers, "Rayon extraction pool started");

        Ok(Self {
            shared,
            intake: Intake::new(tx),
            done: done_rx,
            workers,
            closed: AtomicBool::new(false),
            _pool: pool,
        })
    }

    fn wait_for_workers(&self) -> usize {
        let mut panicked = 0;
        for _ in 0..self.workers {
            match self.done.recv() {
                Ok(true) => {}
                Ok(false) => panicked += 1,
                Err(_) => break,
            }
        }
        panicked
    }
}

impl<T: Send + 'static> ExtractionPool for RayonPool<T> {
    fn submit(&self, page: WikiPage) -> Result<()> {
        self.intake.submit(page, &self.shared)
    }

    fn processed_pages(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    fn is_accepting(&self) -> bool {
        self.intake.is_open() && !self.shared.is_queue_closed()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.intake.close();

        let panicked = self.wait_for_workers();
        info!(processed = self.processed_pages(), "Extraction pool closed");
        if panicked > 0 {
            bail!("{} extraction worker(s) panicked", panicked);
        }
        Ok(())
    }
}

impl<T: Send + 'static> Drop for RayonPool<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Extraction pool shut down with errors");
        }
    }
}
