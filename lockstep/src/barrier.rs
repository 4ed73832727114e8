//! A reusable barrier whose participant count is supplied at call time.

use std::sync::{Condvar, Mutex};

/// Generation-counted barrier.
///
/// Unlike `std::sync::Barrier`, the number of participants is an argument of
/// [`KBarrier::wait`], so one barrier can serve phases with different thread
/// counts. Every thread of a phase must pass the same count.
#[derive(Default)]
pub struct KBarrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    count: usize,
    generation: u64,
}

impl KBarrier {
    /// Creates a barrier.
    pub fn new() -> Self {
        KBarrier::default()
    }

    /// Blocks until `num_threads` threads have called `wait` for the
    /// current generation.
    pub fn wait(&self, num_threads: usize) {
        let mut state = self.state.lock().expect("barrier poisoned");
        state.count += 1;
        if state.count == num_threads {
            state.count = 0;
            state.generation += 1;
            self.cv.notify_all();
            return;
        }
        let generation = state.generation;
        while state.generation == generation {
            state = self.cv.wait(state).expect("barrier poisoned");
        }
    }
}
