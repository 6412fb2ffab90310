//! Event queue - callback invocations dispatched out of lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// A queued listener invocation.
pub type Event = Box<dyn FnOnce() + Send>;

/// Unbounded FIFO of listener invocations.
///
/// Events are enqueued only after the state lock that produced them has
/// been released (lock order: registry < core state < event queue). The
/// queue is unbounded; callers that need backpressure bound it themselves.
#[derive(Default)]
pub struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.queue.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<Event> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Run one event, isolating panics: one listener's failure never stops
    /// the dispatcher.
    pub fn run(event: Event) {
        if catch_unwind(AssertUnwindSafe(event)).is_err() {
            warn!("event callback panicked; dropping");
        }
    }

    /// Synchronously run everything queued, including events enqueued by
    /// the callbacks themselves. Returns the number of events run. Intended
    /// for deterministic backtest harnesses.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(event) = self.pop() {
            Self::run(event);
            count += 1;
        }
        count
    }
}
