//! A generation-counted publish/read cell shared by the local workers of one
//! process.
//!
//! One worker owns the cell and alternates `update` and `commit`; every
//! local worker (owner included) reads a committed generation with `with`
//! and releases it with `leave`. The owner's next `update` waits until all
//! readers of the previous generation have left.

use std::sync::{Arc, Condvar, Mutex};

/// Shared cell; clones refer to the same storage.
pub struct Accessor<T> {
    inner: Arc<AccessorInner<T>>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Accessor { inner: Arc::clone(&self.inner) }
    }
}

struct AccessorInner<T> {
    state: Mutex<AccessorState<T>>,
    cv: Condvar,
    max_visitors: usize,
}

struct AccessorState<T> {
    value: T,
    generation: u64,
    pending_leaves: usize,
}

impl<T> Accessor<T> {
    /// Creates a cell read by `max_visitors` workers per generation.
    pub fn new(value: T, max_visitors: usize) -> Self {
        Accessor {
            inner: Arc::new(AccessorInner {
                state: Mutex::new(AccessorState { value, generation: 0, pending_leaves: 0 }),
                cv: Condvar::new(),
                max_visitors,
            }),
        }
    }

    /// Owner-side mutation; waits until every reader of the previous
    /// generation has left.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.inner.state.lock().expect("accessor poisoned");
        while state.pending_leaves > 0 {
            state = self.inner.cv.wait(state).expect("accessor poisoned");
        }
        f(&mut state.value)
    }

    /// Publishes the current content as the next generation.
    pub fn commit(&self) {
        let mut state = self.inner.state.lock().expect("accessor poisoned");
        assert_eq!(state.pending_leaves, 0, "Accessor::commit before all readers left");
        state.generation += 1;
        state.pending_leaves = self.inner.max_visitors;
        self.inner.cv.notify_all();
    }

    /// Reads once generation `generation` (or later) is committed.
    pub fn with<R>(&self, generation: u64, f: impl FnOnce(&T) -> R) -> R {
        let mut state = self.inner.state.lock().expect("accessor poisoned");
        while state.generation < generation {
            state = self.inner.cv.wait(state).expect("accessor poisoned");
        }
        f(&state.value)
    }

    /// Releases this worker's lease on the current generation.
    pub fn leave(&self) {
        let mut state = self.inner.state.lock().expect("accessor poisoned");
        assert!(state.pending_leaves > 0, "Accessor::leave without a committed generation");
        state.pending_leaves -= 1;
        if state.pending_leaves == 0 {
            self.inner.cv.notify_all();
        }
    }

    /// The most recently committed generation.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().expect("accessor poisoned").generation
    }
}

/// Process-global registry of per-channel accessor cell vectors, keyed by
/// channel id and reference-counted per attached worker.
#[derive(Default)]
pub struct AccessorStore {
    cells: Mutex<std::collections::HashMap<u32, (usize, Arc<dyn std::any::Any + Send + Sync>)>>,
}

impl AccessorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        AccessorStore::default()
    }

    /// Fetches the cell vector for `channel_id` (one cell per local
    /// worker), creating it on first use, and counts the caller as one
    /// attached worker.
    pub fn get_or_create<T>(
        &self,
        channel_id: u32,
        num_cells: usize,
        max_visitors: usize,
    ) -> Arc<Vec<Accessor<T>>>
    where
        T: Default + Send + 'static,
    {
        let mut cells = self.cells.lock().expect("accessor store poisoned");
        let entry = cells.entry(channel_id).or_insert_with(|| {
            let vec: Vec<Accessor<T>> =
                (0..num_cells).map(|_| Accessor::new(T::default(), max_visitors)).collect();
            (0, Arc::new(vec))
        });
        entry.0 += 1;
        Arc::clone(&entry.1)
            .downcast::<Vec<Accessor<T>>>()
            .unwrap_or_else(|_| panic!("accessor cells {} registered with a different type", channel_id))
    }

    /// Releases one worker's reference; the cells are dropped when the last
    /// attached worker releases them.
    pub fn release(&self, channel_id: u32) {
        let mut cells = self.cells.lock().expect("accessor store poisoned");
        if let Some(entry) = cells.get_mut(&channel_id) {
            entry.0 -= 1;
            if entry.0 == 0 {
                cells.remove(&channel_id);
            }
        }
    }
}
