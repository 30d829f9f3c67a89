//! Counting semaphore with an explicit owner wake.
//!
//! `BoundedFrameBuffer` and `WorkerPool` account for slots with pairs of these
//! semaphores. A blocked `acquire` only ends in two ways: enough permits become
//! available, or the owner calls `wake_all`. The latter interrupts every waiter
//! that is parked at the moment of the call and leaves later acquires unaffected,
//! so shutdown code has to set its stop flag before waking.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Returned by a blocking wait that was cut short by `wake_all`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocking wait interrupted by owner wake")
    }
}

impl std::error::Error for Interrupted {}

struct State {
    permits: usize,
    /// Bumped by `wake_all`; waiters compare against the value they parked with.
    epoch: u64,
}

pub struct Semaphore {
    state: Mutex<State>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State { permits, epoch: 0 }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Permit arithmetic never panics mid-update, so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until one permit is available and take it.
    pub fn acquire(&self) -> Result<(), Interrupted> {
        self.acquire_many(1)
    }

    /// Block until `n` permits are available and take all of them at once.
    pub fn acquire_many(&self, n: usize) -> Result<(), Interrupted> {
        let mut state = self.lock();
        let epoch = state.epoch;
        while state.permits < n {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            if state.epoch != epoch {
                return Err(Interrupted);
            }
        }
        state.permits -= n;
        Ok(())
    }

    /// Take one permit if available, never blocking.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        if state.permits == 0 {
            return false;
        }
        state.permits -= 1;
        true
    }

    pub fn release(&self) {
        self.release_many(1);
    }

    pub fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.lock();
        state.permits += n;
        drop(state);
        // Waiters may ask for different amounts; wake them all and let each re-check.
        self.cond.notify_all();
    }

    pub fn available(&self) -> usize {
        self.lock().permits
    }

    /// Overwrite the permit count.
    ///
    /// Only sound while the caller excludes every other user of this semaphore,
    /// as `BoundedFrameBuffer::clear` does by holding both of its gates.
    pub fn reset(&self, permits: usize) {
        let mut state = self.lock();
        state.permits = permits;
        drop(state);
        self.cond.notify_all();
    }

    /// Interrupt every waiter currently parked in `acquire`/`acquire_many`.
    pub fn wake_all(&self) {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        drop(state);
        self.cond.notify_all();
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available())
            .finish()
    }
}
