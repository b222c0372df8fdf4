//! Wikiterm: streaming term extraction from Wikipedia dumps
//!
//! This crate streams the pages of a MediaWiki XML dump through a concurrent
//! pipeline and counts the terms extracted from them into a dictionary:
//!
//! 1. **Scanning** -- A producer thread parses the dump page by page and feeds an
//!    extraction pool
//! 2. **Extraction** -- Pool workers run a term extractor on each page and push the
//!    terms onto a bounded queue
//! 3. **Writing** -- A single writer thread drains the queue into the live dictionary,
//!    polling with an adaptive timeout
//! 4. **Optimization** -- A fresh dictionary handle prunes and exports the result
//!    once every term has been written
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Never loads the full dump into memory; bz2 dumps are
//!   decompressed on the fly
//! - **Backpressure** -- Pool backlog and term queue are both bounded, so a slow writer
//!   throttles the scanner instead of growing memory
//! - **Cooperative cancellation** -- Every blocking wait is bounded and re-checks a
//!   shared cancellation flag
//! - **Per-page isolation** -- A failing or panicking extractor only loses its own page
//! - **Pluggable collaborators** -- Dump source, dictionary, extractor and pool are
//!   supplied by a [`strategy::PipelineStrategy`]
//!
//! # Key Modules
//!
//! - [`supervisor`] -- Run orchestration, state machine and terminal outcome
//! - [`scanner`] -- Producer thread feeding pages into the pool
//! - [`pool`] -- Thread and rayon extraction pools
//! - [`writer`] -- Single dictionary writer with adaptive polling
//! - [`queue`] -- Bounded term queue
//! - [`control`] -- Cancellation and feeding flags, pipeline errors
//! - [`dictionary`] -- Dictionary trait, scoped handles and the file-backed dictionary
//! - [`strategy`] -- Strategy trait and the dump-to-disk strategy used by the CLI
//! - [`parser`] -- Streaming XML parser with BZ2 decompression
//! - [`extract`] / [`content`] -- Built-in term extractors over wikitext
//! - [`stats`] -- Lock-free counters for pipeline metrics
//! - [`config`] -- Constants for queueing, polling and persistence
//!
//! # Example Usage
//!
//! ```bash
//! # Count link targets with 8 workers
//! wikiterm extract -i enwiki-latest-pages-articles.xml.bz2 -o terms/ --terms links --workers 8
//!
//! # Show the most frequent terms
//! wikiterm top -o terms/ -n 20
//! ```

pub mod config;
pub mod content;
pub mod control;
pub mod dictionary;
pub mod extract;
pub mod models;
pub mod parser;
pub mod pool;
pub mod queue;
pub mod scanner;
pub mod stats;
pub mod strategy;
pub mod supervisor;
pub mod writer;
