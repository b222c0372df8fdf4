use std::time::Duration;

/// Capacity of the bounded term queue between the extraction pool and the writer
pub const TERM_QUEUE_CAPACITY: usize = 1024;

/// Writer poll timeout while the queue is active
pub const WRITER_POLL_LOWER: Duration = Duration::from_millis(2);

/// Writer poll timeout ceiling while the queue is idle
pub const WRITER_POLL_UPPER: Duration = Duration::from_millis(25);

/// Growth factor applied to the writer poll timeout after each idle poll
pub const WRITER_POLL_FACTOR: f64 = 1.2;

/// Upper bound on any blocking wait (submit, push) before cancellation is re-checked
pub const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Pages buffered per pool worker before `submit` blocks
pub const POOL_BACKLOG_PER_WORKER: usize = 16;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Bumped whenever the on-disk dictionary layout changes
pub const DICTIONARY_VERSION: u32 = 1;

/// Words shorter than this are not emitted by the word extractor
pub const MIN_WORD_LEN: usize = 3;

/// Default minimum count a term needs to survive optimization
pub const DEFAULT_MIN_COUNT: u64 = 1;
