use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wikiterm::dictionary::TermDictionary;
use wikiterm::extract::TermKind;
use wikiterm::pool::{default_workers, PoolKind};
use wikiterm::scanner::ScanOptions;
use wikiterm::strategy::{DumpConfig, DumpStrategy};
use wikiterm::supervisor::{PipelineSupervisor, RunOutcome};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikiterm")]
#[command(about = "Extract and count terms from Wikipedia dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract terms from a dump into a dictionary
    Extract(ExtractArgs),
    /// Print the most frequent terms of a dictionary
    Top(TopArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: String,

    /// Output directory for the dictionary and exports
    #[arg(short, long)]
    output: String,

    /// Which terms to extract from each page
    #[arg(long, value_enum, default_value_t = TermKind::Links)]
    terms: TermKind,

    /// Concurrency primitive backing the extraction pool
    #[arg(long, value_enum, default_value_t = PoolKind::Threads)]
    pool: PoolKind,

    /// Number of extraction workers (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Capacity of the term queue between extraction and the writer
    #[arg(long, default_value_t = wikiterm::config::TERM_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Limit number of pages to submit (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Skip redirects and non-article namespaces
    #[arg(long)]
    articles_only: bool,

    /// Drop terms seen fewer times than this when optimizing
    #[arg(long, default_value_t = wikiterm::config::DEFAULT_MIN_COUNT)]
    min_count: u64,

    /// Cancel the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Also remove a previous CSV export and summary before starting
    #[arg(long)]
    clean: bool,

    /// Hide the scan spinner
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct TopArgs {
    /// Directory containing the dictionary
    #[arg(short, long)]
    output: String,

    /// Number of terms to print
    #[arg(short = 'n', long, default_value_t = 20)]
    count: usize,
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let mut config = DumpConfig::new(&args.input, &args.output, args.terms);
    config.pool = args.pool;
    config.workers = args.workers.unwrap_or_else(default_workers).max(1);
    config.queue_capacity = args.queue_capacity;
    config.min_count = args.min_count;
    config.clean = args.clean;
    config.scan = ScanOptions {
        limit: args.limit,
        articles_only: args.articles_only,
        show_progress: !args.no_progress,
    };

    let strategy = Arc::new(DumpStrategy::new(config));
    let supervisor = PipelineSupervisor::new(Arc::clone(&strategy));

    let report = thread::scope(|s| {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        if let Some(secs) = args.timeout_secs {
            let supervisor = &supervisor;
            s.spawn(move || {
                if let Err(RecvTimeoutError::Timeout) =
                    done_rx.recv_timeout(Duration::from_secs(secs))
                {
                    warn!(timeout_secs = secs, "Timeout reached, canceling run");
                    supervisor.request_cancel();
                }
            });
        }
        let report = supervisor.run();
        drop(done_tx);
        report
    });

    let stats = &report.stats;
    println!();
    println!("=== Summary ===");
    println!("Outcome:            {}", report.outcome);
    println!("Total time:         {:.2}s", report.elapsed.as_secs_f64());
    println!();
    println!("Pages scanned:      {}", stats.pages_scanned);
    println!("Pages processed:    {}", stats.pages_processed);
    println!("Pages failed:       {}", stats.pages_failed);
    println!("Terms inserted:     {}", stats.terms_inserted);
    println!("Terms failed:       {}", stats.terms_failed);
    println!("Terms discarded:    {}", stats.terms_discarded);

    match report.outcome {
        RunOutcome::Succeeded => Ok(()),
        RunOutcome::Canceled => bail!("Extraction was canceled"),
        RunOutcome::Failed(e) => Err(e),
    }
}

fn run_top(args: TopArgs) -> Result<()> {
    let dir = Path::new(&args.output);
    if !TermDictionary::dictionary_path(dir).exists() {
        bail!("No dictionary found in {}", args.output);
    }
    let dictionary = TermDictionary::open(dir, 1)?;
    if !dictionary.is_optimized() {
        warn!("Dictionary has not been optimized, counts may include rare terms");
    }
    info!(terms = dictionary.len(), "Dictionary loaded");

    for term in dictionary.top(args.count) {
        println!("{:>10}  {}", term.count, term.term);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Top(args) => run_top(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
