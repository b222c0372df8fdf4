//! Bounded term queue between the extraction pool and the dictionary writer.
//!
//! The queue capacity is the single backpressure valve of the pipeline:
//! workers block in [`TermSender::push`] while it is full. Every wait is
//! bounded so a blocked worker still observes cancellation.

use crate::config::BLOCKING_POLL_INTERVAL;
use crate::control::{PipelineError, RunControl};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::Duration;

/// Creates a queue holding at most `capacity` terms (minimum 1).
pub fn bounded<T>(capacity: usize) -> (TermSender<T>, TermReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (TermSender { tx }, TermReceiver { rx })
}

pub struct TermSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for TermSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TermSender<T> {
    /// Blocks while the queue is full. Fails with `Canceled` if cancellation
    /// is requested while waiting, or `QueueClosed` once the receiver is gone.
    pub fn push(&self, term: T, control: &RunControl) -> Result<(), PipelineError> {
        let mut term = term;
        loop {
            match self.tx.send_timeout(term, BLOCKING_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    control.check()?;
                    term = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(PipelineError::QueueClosed),
            }
        }
    }
}

/// Result of a single timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    Empty,
    /// Every sender is gone and nothing is left to read.
    Closed,
}

pub struct TermReceiver<T> {
    rx: Receiver<T>,
}

impl<T> TermReceiver<T> {
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(term) => Pop::Item(term),
            Err(RecvTimeoutError::Timeout) => Pop::Empty,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let control = RunControl::new();
        let (tx, rx) = bounded(4);
        for i in 0..3 {
            tx.push(i, &control).unwrap();
        }
        assert_eq!(rx.try_pop(), Some(0));
        assert_eq!(rx.pop_timeout(Duration::from_millis(1)), Pop::Item(1));
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.pop_timeout(Duration::from_millis(1)), Pop::Empty);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let control = RunControl::new();
        let (tx, rx) = bounded::<u8>(0);
        tx.push(1, &control).unwrap();
        control.cancel();
        assert_eq!(tx.push(2, &control), Err(PipelineError::Canceled));
        assert_eq!(rx.try_pop(), Some(1));
    }

    #[test]
    fn full_queue_push_observes_cancel() {
        let control = Arc::new(RunControl::new());
        let (tx, _rx) = bounded(1);
        tx.push(1, &control).unwrap();

        let canceler = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                control.cancel();
            })
        };

        let start = Instant::now();
        assert_eq!(tx.push(2, &control), Err(PipelineError::Canceled));
        assert!(start.elapsed() < Duration::from_secs(2));
        canceler.join().unwrap();
    }

    #[test]
    fn push_fails_when_receiver_dropped() {
        let control = RunControl::new();
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(tx.push(1, &control), Err(PipelineError::QueueClosed));
    }

    #[test]
    fn pop_reports_closed_after_senders_drop() {
        let control = RunControl::new();
        let (tx, rx) = bounded(2);
        tx.push("a", &control).unwrap();
        drop(tx);
        assert_eq!(rx.pop_timeout(Duration::from_millis(1)), Pop::Item("a"));
        assert_eq!(rx.pop_timeout(Duration::from_millis(1)), Pop::Closed);
    }
}
