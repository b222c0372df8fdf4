use crate::config::TERM_QUEUE_CAPACITY;
use crate::dictionary::{Dictionary, TermDictionary};
use crate::extract::{TermExtractor, TermKind};
use crate::parser::WikiSource;
use crate::pool::{default_workers, ExtractionPool, PoolContext, PoolKind};
use crate::scanner::ScanOptions;
use crate::stats::StatsSnapshot;
use crate::supervisor::RunOutcome;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Collaborator that plugs a concrete dump, dictionary and extractor into a
/// [`PipelineSupervisor`](crate::supervisor::PipelineSupervisor).
///
/// The supervisor calls `create_dictionary` twice per run: once on the
/// writer thread and once for the optimize pass. Each handle stays on the
/// thread that created it.
pub trait PipelineStrategy: Send + Sync + 'static {
    type Term: Send + 'static;
    type Dictionary: Dictionary<Self::Term>;

    /// Runs before anything else. An error aborts the run.
    fn initialize_pipeline(&self) -> Result<()> {
        Ok(())
    }

    fn wiki_source(&self) -> Result<WikiSource>;

    fn create_dictionary(&self) -> Result<Self::Dictionary>;

    fn term_extractor(&self) -> TermExtractor<Self::Term>;

    fn create_pool(&self, ctx: PoolContext<Self::Term>) -> Result<Box<dyn ExtractionPool>> {
        PoolKind::Threads.create(ctx, default_workers())
    }

    fn queue_capacity(&self) -> usize {
        TERM_QUEUE_CAPACITY
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions::default()
    }

    /// Progress and per-page failure messages. Called from worker threads.
    fn on_message(&self, message: &str);

    /// Called exactly once per run with its terminal outcome.
    fn on_ended(&self, outcome: &RunOutcome);

    /// Interrupts blocking work the strategy owns. Runs before the pipeline's
    /// own cancellation flag is set.
    fn request_cancel(&self) {}

    /// Runs only after a successful optimize pass.
    fn perform_last_successful_steps(&self, _stats: &StatsSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Settings for a [`DumpStrategy`] run.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub terms: TermKind,
    pub pool: PoolKind,
    pub workers: usize,
    pub queue_capacity: usize,
    pub min_count: u64,
    pub scan: ScanOptions,
    /// Also remove a previous CSV export and summary before starting
    pub clean: bool,
}

impl DumpConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, terms: TermKind) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            terms,
            pool: PoolKind::default(),
            workers: default_workers(),
            queue_capacity: TERM_QUEUE_CAPACITY,
            min_count: crate::config::DEFAULT_MIN_COUNT,
            scan: ScanOptions::default(),
            clean: false,
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    input: String,
    terms: TermKind,
    pool: PoolKind,
    workers: usize,
    min_count: u64,
    distinct_terms: usize,
    stats: &'a StatsSnapshot,
}

/// Strategy behind the `extract` command: reads a dump from disk, counts
/// built-in terms into a [`TermDictionary`] in the output directory and
/// writes `summary.json` when the run succeeds.
///
/// Every run starts from an empty dictionary: a `dictionary.bin` left by an
/// earlier run is removed during initialization.
pub struct DumpStrategy {
    config: DumpConfig,
    failed_pages: AtomicU64,
}

impl DumpStrategy {
    pub fn new(config: DumpConfig) -> Self {
        Self {
            config,
            failed_pages: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DumpConfig {
        &self.config
    }

    pub fn summary_path(dir: &Path) -> PathBuf {
        dir.join("summary.json")
    }

    /// Number of per-page failure messages received so far.
    pub fn failed_pages(&self) -> u64 {
        self.failed_pages.load(Ordering::Relaxed)
    }

    fn remove_outputs(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            if path.exists() {
                info!(path = ?path, "Removing previous output");
                fs::remove_file(path).with_context(|| format!("Failed to remove: {:?}", path))?;
            }
        }
        Ok(())
    }
}

impl PipelineStrategy for DumpStrategy {
    type Term = String;
    type Dictionary = TermDictionary;

    fn initialize_pipeline(&self) -> Result<()> {
        if !self.config.input.is_file() {
            bail!("Input dump not found: {:?}", self.config.input);
        }
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {:?}",
                self.config.output_dir
            )
        })?;
        let dir = &self.config.output_dir;
        self.remove_outputs(&[TermDictionary::dictionary_path(dir)])?;
        if self.config.clean {
            self.remove_outputs(&[TermDictionary::export_path(dir), Self::summary_path(dir)])?;
        }
        info!(
            input = ?self.config.input,
            output = ?self.config.output_dir,
            terms = ?self.config.terms,
            pool = ?self.config.pool,
            workers = self.config.workers,
            "Pipeline initialized"
        );
        Ok(())
    }

    fn wiki_source(&self) -> Result<WikiSource> {
        Ok(WikiSource::path(&self.config.input))
    }

    fn create_dictionary(&self) -> Result<TermDictionary> {
        TermDictionary::open(&self.config.output_dir, self.config.min_count)
    }

    fn term_extractor(&self) -> TermExtractor<String> {
        self.config.terms.extractor()
    }

    fn create_pool(&self, ctx: PoolContext<String>) -> Result<Box<dyn ExtractionPool>> {
        self.config.pool.create(ctx, self.config.workers)
    }

    fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    fn scan_options(&self) -> ScanOptions {
        self.config.scan.clone()
    }

    fn on_message(&self, message: &str) {
        self.failed_pages.fetch_add(1, Ordering::Relaxed);
        warn!("{}", message);
    }

    fn on_ended(&self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Succeeded => info!("Term extraction succeeded"),
            RunOutcome::Canceled => warn!("Term extraction canceled"),
            RunOutcome::Failed(e) => error!(error = %format!("{:#}", e), "Term extraction failed"),
        }
    }

    fn request_cancel(&self) {
        info!(input = ?self.config.input, "Cancel requested for dump extraction");
    }

    fn perform_last_successful_steps(&self, stats: &StatsSnapshot) -> Result<()> {
        let dictionary = TermDictionary::open(&self.config.output_dir, self.config.min_count)?;
        let summary = RunSummary {
            input: self.config.input.display().to_string(),
            terms: self.config.terms,
            pool: self.config.pool,
            workers: self.config.workers,
            min_count: self.config.min_count,
            distinct_terms: dictionary.len(),
            stats,
        };

        let path = Self::summary_path(&self.config.output_dir);
        let file = File::create(&path).with_context(|| format!("Failed to create: {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &summary)
            .context("Failed to write run summary")?;
        info!(path = ?path, "Run summary written");
        Ok(())
    }
}
