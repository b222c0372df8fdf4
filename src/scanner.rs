use crate::config::PROGRESS_INTERVAL;
use crate::control::{PipelineError, RunControl};
use crate::parser::{WikiReader, WikiSource};
use crate::pool::ExtractionPool;
use crate::stats::PipelineStats;
use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Stop after this many pages have been submitted
    pub limit: Option<u64>,
    /// Skip redirects and non-article namespaces before submitting
    pub articles_only: bool,
    /// Draw a spinner on stderr
    pub show_progress: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub pages_read: u64,
    pub pages_submitted: u64,
    /// Scan ended before the end of the dump because of cancellation or a
    /// closed pool. Not an error by itself.
    pub stopped_early: bool,
}

/// Producer thread that streams pages out of the dump into the extraction pool.
///
/// Failures inside the thread are returned from [`PageScanner::join`] rather
/// than unwinding across the join.
pub struct PageScanner {
    handle: JoinHandle<Result<ScanSummary>>,
}

impl PageScanner {
    pub fn start(
        source: WikiSource,
        pool: Arc<dyn ExtractionPool>,
        control: Arc<RunControl>,
        stats: Arc<PipelineStats>,
        options: ScanOptions,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("wikiterm-scanner".to_string())
            .spawn(move || scan(source, pool.as_ref(), &control, &stats, &options))
            .context("Failed to spawn page scanner")?;
        Ok(Self { handle })
    }

    pub fn join(self) -> Result<ScanSummary> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Page scanner thread panicked"))?
    }
}

fn stops_scan(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Canceled | PipelineError::PoolClosed)
    )
}

fn scan(
    source: WikiSource,
    pool: &dyn ExtractionPool,
    control: &RunControl,
    stats: &PipelineStats,
    options: &ScanOptions,
) -> Result<ScanSummary> {
    info!(source = %source, "Scanning dump");
    let mut reader = WikiReader::from_source(source)?;
    let pb = if options.show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };

    let mut summary = ScanSummary::default();
    loop {
        if !control.should_continue() || !pool.is_accepting() {
            summary.stopped_early = true;
            break;
        }
        if options.limit.is_some_and(|limit| summary.pages_submitted >= limit) {
            debug!(limit = ?options.limit, "Page limit reached");
            break;
        }

        let page = reader
            .next_page()
            .with_context(|| format!("Failed to read page after {} pages", summary.pages_read))?;
        let Some(page) = page else {
            break;
        };

        summary.pages_read += 1;
        stats.inc_scanned();
        if summary.pages_read % PROGRESS_INTERVAL == 0 {
            pb.set_message(format!("{} pages scanned", summary.pages_read));
            pb.tick();
        }

        if options.articles_only && !page.is_article() {
            continue;
        }

        match pool.submit(page) {
            Ok(()) => summary.pages_submitted += 1,
            Err(e) if stops_scan(&e) => {
                summary.stopped_early = true;
                break;
            }
            Err(e) => return Err(e.context("Failed to submit page to extraction pool")),
        }
    }

    pb.finish_and_clear();
    info!(
        pages = summary.pages_read,
        submitted = summary.pages_submitted,
        stopped_early = summary.stopped_early,
        "Scan finished"
    );
    Ok(summary)
}
