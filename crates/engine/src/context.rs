//! Process-wide dispatch flags, passed explicitly to the dispatcher and
//! the cancellation controller.

use std::sync::atomic::{AtomicBool, Ordering};

/// Batch-run flag plus the single-claim flag.
#[derive(Debug, Default)]
pub struct DispatchContext {
    batch_running: AtomicBool,
    claim_in_flight: AtomicBool,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }

    /// Set the batch flag, returning the previous value.
    pub fn set_batch_running(&self, running: bool) -> bool {
        self.batch_running.swap(running, Ordering::AcqRel)
    }

    pub fn claim_in_flight(&self) -> bool {
        self.claim_in_flight.load(Ordering::Acquire)
    }

    /// Take the global claim. `None` while another claim is in progress;
    /// dropping the guard releases it.
    pub fn try_claim(&self) -> Option<ClaimGuard<'_>> {
        self.claim_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClaimGuard {
                flag: &self.claim_in_flight,
            })
    }
}

/// Holds the single claim slot of a [`DispatchContext`].
#[derive(Debug)]
pub struct ClaimGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
