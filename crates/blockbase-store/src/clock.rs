//! Strictly increasing millisecond clock.

use std::sync::atomic::{AtomicI64, Ordering};

/// Wall-clock milliseconds that never repeat or go backwards within a store.
///
/// Two mutations in the same millisecond still get distinct, ordered
/// `update_at` values.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max(wall clock, previous + 1)`.
    pub fn now_millis(&self) -> i64 {
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = blockbase_types::now_millis().max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
