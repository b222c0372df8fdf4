//! Integration tests for the Wikiterm extraction pipeline.
//!
//! These tests drive the complete data flow from a BZ2-compressed XML dump on disk,
//! through the supervisor with the CLI's `DumpStrategy`, to the persisted dictionary,
//! its CSV export and the run summary. Tests are organized into sections:
//!
//! - **Parser Tests** -- XML parsing, BZ2 decompression, page type classification
//! - **Pipeline Tests** -- End-to-end runs for each term kind and pool flavour
//! - **Persistence Tests** -- Reruns, cleaning, summaries
//! - **Failure Tests** -- Missing input, malformed dumps, timeouts
//!
//! # Sample Data
//!
//! The shared `sample_xml()` fixture contains:
//! - 2 articles: "Rust (programming language)", "Python (programming language)"
//! - 1 redirect: "Rust" -> "Rust (programming language)"
//! - 2 special pages: File:Rust logo.svg, Category:Programming languages

use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};
use wikiterm::dictionary::TermDictionary;
use wikiterm::extract::TermKind;
use wikiterm::models::PageType;
use wikiterm::models::WikiPage;
use wikiterm::parser::{WikiReader, WikiSource};
use wikiterm::pool::PoolKind;
use wikiterm::scanner::ScanOptions;
use wikiterm::strategy::{DumpConfig, DumpStrategy};
use wikiterm::supervisor::{PipelineState, PipelineSupervisor, RunReport};

/// Helper: create a BZ2-compressed XML file with a `.xml.bz2` suffix.
fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new()
        .suffix(".xml.bz2")
        .tempfile()
        .unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn create_plain_xml(xml: &str) -> NamedTempFile {
    let mut tmp = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
    tmp.write_all(xml.as_bytes()).unwrap();
    tmp.flush().unwrap();
    tmp
}

/// Sample Wikipedia XML with articles, a redirect, special pages, links and categories.
fn sample_xml() -> &'static str {
    r#"<mediawiki>
        <page>
            <title>Rust (programming language)</title>
            <ns>0</ns>
            <id>1</id>
            <revision>
                <id>100</id>
                <timestamp>2024-01-15T10:30:00Z</timestamp>
                <text>{{Infobox programming language
| name = Rust
| designer = Graydon Hoare
}}
Rust is a systems programming language. See also [[Python (programming language)]] and [[C++|C plus plus]].

It was developed by [[Mozilla]].

[[File:Rust logo.svg|thumb|The Rust logo]]

== History ==
Rust was first announced in 2010.

== See also ==
* [[Python (programming language)]]

[[Category:Programming languages]]
[[Category:Systems programming languages]]</text>
            </revision>
        </page>
        <page>
            <title>Python (programming language)</title>
            <ns>0</ns>
            <id>2</id>
            <revision>
                <id>200</id>
                <timestamp>2024-02-20T14:00:00Z</timestamp>
                <text>Python is a high-level language. Related: [[Rust (programming language)]].

[[Category:Programming languages]]</text>
            </revision>
        </page>
        <page>
            <title>Rust</title>
            <ns>0</ns>
            <id>3</id>
            <redirect title="Rust (programming language)" />
            <revision>
                <id>300</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>#REDIRECT [[Rust (programming language)]]</text>
            </revision>
        </page>
        <page>
            <title>File:Rust logo.svg</title>
            <ns>6</ns>
            <id>4</id>
            <revision>
                <id>400</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>File description page</text>
            </revision>
        </page>
        <page>
            <title>Category:Programming languages</title>
            <ns>14</ns>
            <id>5</id>
            <revision>
                <id>500</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>Category page</text>
            </revision>
        </page>
    </mediawiki>"#
}

fn config(input: &NamedTempFile, output: &TempDir, terms: TermKind) -> DumpConfig {
    let mut config = DumpConfig::new(input.path(), output.path(), terms);
    config.workers = 2;
    config
}

fn run(config: DumpConfig) -> (RunReport, Arc<DumpStrategy>) {
    let strategy = Arc::new(DumpStrategy::new(config));
    let supervisor = PipelineSupervisor::new(Arc::clone(&strategy));
    let report = supervisor.run();
    assert_eq!(supervisor.state(), PipelineState::Done);
    (report, strategy)
}

fn read_pages(file: &NamedTempFile) -> Vec<WikiPage> {
    let mut reader = WikiReader::from_source(WikiSource::path(file.path())).unwrap();
    let mut pages = Vec::new();
    while let Some(page) = reader.next_page().unwrap() {
        pages.push(page);
    }
    pages
}

fn open_dictionary(dir: &TempDir) -> TermDictionary {
    TermDictionary::open(dir.path(), 1).unwrap()
}

// ---------------------------------------------------------------------------
// Parser integration tests
// ---------------------------------------------------------------------------

#[test]
fn parser_reads_all_pages() {
    let tmp = create_bz2_xml(sample_xml());
    let pages = read_pages(&tmp);
    assert_eq!(pages.len(), 5);
}

#[test]
fn parser_classifies_page_types() {
    let tmp = create_bz2_xml(sample_xml());
    let pages = read_pages(&tmp);

    assert!(matches!(pages[0].page_type, PageType::Article));
    assert!(matches!(pages[1].page_type, PageType::Article));
    assert_eq!(
        pages[2].page_type,
        PageType::Redirect("Rust (programming language)".to_string())
    );
    assert!(matches!(pages[3].page_type, PageType::Special));
    assert!(matches!(pages[4].page_type, PageType::Special));
}

#[test]
fn parser_reads_metadata_and_text() {
    let tmp = create_bz2_xml(sample_xml());
    let pages = read_pages(&tmp);

    assert_eq!(pages[0].id, 1);
    assert_eq!(pages[4].ns, Some(14));
    assert_eq!(pages[1].timestamp.as_deref(), Some("2024-02-20T14:00:00Z"));
    assert!(pages[0]
        .text
        .as_deref()
        .unwrap()
        .contains("systems programming language"));
}

#[test]
fn parser_reads_plain_xml() {
    let tmp = create_plain_xml(sample_xml());
    assert_eq!(read_pages(&tmp).len(), 5);
}

// ---------------------------------------------------------------------------
// End-to-end pipeline tests
// ---------------------------------------------------------------------------

#[test]
fn links_are_counted_across_all_pages() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let (report, strategy) = run(config(&input, &output, TermKind::Links));

    assert!(report.outcome.is_success(), "{}", report.outcome);
    assert_eq!(report.stats.pages_scanned, 5);
    assert_eq!(report.stats.pages_processed, 5);
    assert_eq!(report.stats.terms_inserted, 6);
    assert_eq!(strategy.failed_pages(), 0);

    let dict = open_dictionary(&output);
    assert!(dict.is_optimized());
    assert_eq!(dict.count("Python (programming language)"), 2);
    assert_eq!(dict.count("Rust (programming language)"), 2);
    assert_eq!(dict.count("C++"), 1);
    assert_eq!(dict.count("Mozilla"), 1);
    assert_eq!(dict.count("File:Rust logo.svg"), 0);
}

#[test]
fn categories_are_pruned_by_min_count() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let mut config = config(&input, &output, TermKind::Categories);
    config.min_count = 2;
    let (report, _) = run(config);

    assert!(report.outcome.is_success());
    assert_eq!(report.stats.terms_inserted, 3);

    let csv = fs::read_to_string(TermDictionary::export_path(output.path())).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec!["term,count", "Programming languages,2"]);
}

#[test]
fn words_come_from_the_lead_section() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let (report, _) = run(config(&input, &output, TermKind::Words));

    assert!(report.outcome.is_success());
    let dict = open_dictionary(&output);
    assert!(dict.count("rust") >= 1);
    assert!(dict.count("python") >= 1);
    assert_eq!(dict.count("announced"), 0);
    assert_eq!(dict.count("graydon"), 0);
}

#[test]
fn articles_only_skips_redirects_and_special_pages() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let mut config = config(&input, &output, TermKind::Links);
    config.scan = ScanOptions {
        articles_only: true,
        ..Default::default()
    };
    let (report, _) = run(config);

    assert!(report.outcome.is_success());
    assert_eq!(report.stats.pages_scanned, 5);
    assert_eq!(report.stats.pages_submitted, 2);
    assert_eq!(
        open_dictionary(&output).count("Rust (programming language)"),
        1
    );
}

#[test]
fn rayon_pool_with_limit() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let mut config = config(&input, &output, TermKind::Links);
    config.pool = PoolKind::Rayon;
    config.queue_capacity = 1;
    config.scan.limit = Some(2);
    let (report, _) = run(config);

    assert!(report.outcome.is_success());
    assert_eq!(report.stats.pages_submitted, 2);
    assert_eq!(report.stats.pages_processed, 2);

    let dict = open_dictionary(&output);
    assert_eq!(dict.count("Python (programming language)"), 2);
    assert_eq!(dict.count("Rust (programming language)"), 1);
}

#[test]
fn empty_dump_succeeds_with_empty_dictionary() {
    let input = create_bz2_xml("<mediawiki></mediawiki>");
    let output = TempDir::new().unwrap();
    let (report, _) = run(config(&input, &output, TermKind::Links));

    assert!(report.outcome.is_success());
    assert_eq!(report.stats.pages_processed, 0);
    assert!(open_dictionary(&output).is_optimized());

    let csv = fs::read_to_string(TermDictionary::export_path(output.path())).unwrap();
    assert_eq!(csv.trim(), "term,count");
}

// ---------------------------------------------------------------------------
// Persistence tests
// ---------------------------------------------------------------------------

#[test]
fn summary_json_describes_the_run() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let (report, _) = run(config(&input, &output, TermKind::Links));
    assert!(report.outcome.is_success());

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(DumpStrategy::summary_path(output.path())).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["terms"], "links");
    assert_eq!(summary["pool"], "threads");
    assert_eq!(summary["distinct_terms"], 4);
    assert_eq!(summary["stats"]["terms_inserted"], 6);
}

#[test]
fn rerun_gives_same_counts_as_single_run() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();

    for _ in 0..2 {
        let mut config = config(&input, &output, TermKind::Categories);
        config.min_count = 2;
        let (report, _) = run(config);
        assert!(report.outcome.is_success(), "{}", report.outcome);
        assert_eq!(report.stats.terms_inserted, 3);

        let csv = fs::read_to_string(TermDictionary::export_path(output.path())).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["term,count", "Programming languages,2"]);
    }

    run(config(&input, &output, TermKind::Links));
    run(config(&input, &output, TermKind::Links));
    let dict = open_dictionary(&output);
    assert_eq!(dict.count("Mozilla"), 1);
    assert_eq!(dict.count("Python (programming language)"), 2);
    assert_eq!(dict.count("Programming languages"), 0);
}

#[test]
fn clean_also_removes_previous_exports() {
    let input = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    run(config(&input, &output, TermKind::Links));
    assert!(DumpStrategy::summary_path(output.path()).exists());

    let empty = create_bz2_xml("<mediawiki></mediawiki>");
    let mut cleaned = config(&empty, &output, TermKind::Links);
    cleaned.clean = true;
    let (report, _) = run(cleaned);

    assert!(report.outcome.is_success());
    assert!(open_dictionary(&output).is_empty());
    let csv = fs::read_to_string(TermDictionary::export_path(output.path())).unwrap();
    assert_eq!(csv.lines().collect::<Vec<_>>(), vec!["term,count"]);
}

// ---------------------------------------------------------------------------
// Failure tests
// ---------------------------------------------------------------------------

#[test]
fn missing_input_fails_before_extraction() {
    let output = TempDir::new().unwrap();
    let config = DumpConfig::new(
        output.path().join("missing.xml.bz2"),
        output.path(),
        TermKind::Links,
    );
    let (report, _) = run(config);

    let err = report.outcome.error().expect("run should fail");
    assert!(format!("{:#}", err).contains("Input dump not found"));
    assert!(!TermDictionary::dictionary_path(output.path()).exists());
    assert!(!DumpStrategy::summary_path(output.path()).exists());
}

#[test]
fn malformed_dump_fails_the_run() {
    let input = create_bz2_xml("<mediawiki><page><title>Broken</title><ns>0</ns>");
    let output = TempDir::new().unwrap();
    let (report, _) = run(config(&input, &output, TermKind::Links));

    let err = report.outcome.error().expect("run should fail");
    assert!(format!("{:#}", err).contains("Page scanner failed"));
    assert!(!DumpStrategy::summary_path(output.path()).exists());
}

#[test]
fn external_cancel_ends_large_run() {
    let mut xml = String::from("<mediawiki>");
    for i in 1..=20_000 {
        xml.push_str(&format!(
            "<page><title>Page {0}</title><ns>0</ns><id>{0}</id><revision><text>[[Target {1}]] [[Other]]</text></revision></page>",
            i,
            i % 97
        ));
    }
    xml.push_str("</mediawiki>");
    let input = create_bz2_xml(&xml);
    let output = TempDir::new().unwrap();
    let mut config = config(&input, &output, TermKind::Links);
    config.queue_capacity = 1;

    let strategy = Arc::new(DumpStrategy::new(config));
    let supervisor = PipelineSupervisor::new(Arc::clone(&strategy));

    let report = thread::scope(|s| {
        let run = s.spawn(|| supervisor.run());
        thread::sleep(Duration::from_millis(20));
        let canceled_at = Instant::now();
        supervisor.request_cancel();
        let report = run.join().unwrap();
        assert!(canceled_at.elapsed() < Duration::from_secs(5));
        report
    });

    // A run that beat the cancel to the finish line is still a valid outcome.
    assert!(report.outcome.is_canceled() || report.outcome.is_success());
    if report.outcome.is_canceled() {
        assert!(!DumpStrategy::summary_path(output.path()).exists());
    }
    assert_eq!(supervisor.control().feeding_stops(), 1);
}
