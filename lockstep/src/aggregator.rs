//! Cluster-wide reduction cells synchronized once per superstep.
//!
//! Every worker keeps a thread-local copy of each aggregator. One
//! [`AggregatorFactory::sync`] round reduces the copies in two levels:
//! within each process the local center for an aggregator (round-robin by
//! aggregator index) folds all local partials; across processes the global
//! center (again round-robin) folds the per-process partials onto the
//! running value and broadcasts the result back, so afterwards every worker
//! reads the same reduction.
//!
//! The factory owns the aggregator state; [`Aggregator`] handles are shared
//! references to their worker-local cell. Workers must create aggregators
//! in the same order, and flag changes (activation, reset policy) must be
//! made uniformly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use lockstep_bytes::{BinStream, Serialize};
use lockstep_communication::WorkerInfo;

use crate::barrier::KBarrier;
use crate::channel::AggregatorChannel;

/// Per-process state shared by the local factories.
#[derive(Default)]
pub struct AggregatorShared {
    barrier: KBarrier,
    /// Per-worker published partials, one slot per aggregator.
    slots: Mutex<Vec<Vec<Option<BinStream>>>>,
    /// Reduced values written by local centers, read by every worker.
    synced: Mutex<Vec<Option<BinStream>>>,
}

impl AggregatorShared {
    /// Creates empty shared state.
    pub fn new() -> Self {
        AggregatorShared::default()
    }
}

struct AggregatorCell<V> {
    update: V,
    updated: bool,
    synced: V,
    init: V,
    center: Option<V>,
    scratch: Option<V>,
    combine: Box<dyn Fn(&mut V, &V)>,
    zero: Box<dyn Fn(&mut V)>,
    load: Box<dyn Fn(&mut BinStream) -> V>,
    save: Box<dyn Fn(&mut BinStream, &V)>,
    reset_each_iter: bool,
    active: bool,
}

/// Type-erased steps of the synchronization protocol.
trait AggregatorSyncOps {
    fn is_active(&self) -> bool;
    /// Writes `updated` flag plus value, then zeroes the local copy.
    fn save_partial(&mut self, bin: &mut BinStream);
    fn begin_merge(&mut self);
    /// Folds one worker's partial into the merge scratch.
    fn merge_partial(&mut self, bin: &mut BinStream);
    /// Writes the merged per-process partial.
    fn save_merged(&mut self, bin: &mut BinStream);
    /// Starts a center round from the kept value (or afresh when the
    /// aggregator resets each iteration).
    fn begin_center_round(&mut self);
    /// Folds one process's partial into the center value.
    fn absorb_center(&mut self, bin: &mut BinStream);
    /// Writes the reduced center value.
    fn save_center(&mut self, bin: &mut BinStream);
    /// Installs the broadcast value as this worker's synced copy.
    fn load_synced(&mut self, bin: &mut BinStream);
}

impl<V: Clone + 'static> AggregatorSyncOps for AggregatorCell<V> {
    fn is_active(&self) -> bool {
        self.active
    }

    fn save_partial(&mut self, bin: &mut BinStream) {
        bin.push(&self.updated);
        if self.updated {
            (self.save)(bin, &self.update);
            (self.zero)(&mut self.update);
            self.updated = false;
        }
    }

    fn begin_merge(&mut self) {
        self.scratch = None;
    }

    fn merge_partial(&mut self, bin: &mut BinStream) {
        if !bin.pop::<bool>() {
            return;
        }
        let value = (self.load)(bin);
        match &mut self.scratch {
            Some(scratch) => (self.combine)(scratch, &value),
            slot @ None => *slot = Some(value),
        }
    }

    fn save_merged(&mut self, bin: &mut BinStream) {
        bin.push(&self.scratch.is_some());
        if let Some(scratch) = self.scratch.take() {
            (self.save)(bin, &scratch);
        }
    }

    fn begin_center_round(&mut self) {
        if self.reset_each_iter || self.center.is_none() {
            self.center = Some(self.init.clone());
        }
    }

    fn absorb_center(&mut self, bin: &mut BinStream) {
        if !bin.pop::<bool>() {
            return;
        }
        let value = (self.load)(bin);
        let center = self.center.as_mut().expect("center round not started");
        (self.combine)(center, &value);
    }

    fn save_center(&mut self, bin: &mut BinStream) {
        let center = self.center.as_ref().expect("center round not started");
        (self.save)(bin, center);
    }

    fn load_synced(&mut self, bin: &mut BinStream) {
        self.synced = (self.load)(bin);
    }
}

/// A handle to one reduction cell.
///
/// `update` folds into the worker-local copy; `get_value` reads the result
/// of the last [`AggregatorFactory::sync`].
pub struct Aggregator<V> {
    cell: Rc<RefCell<AggregatorCell<V>>>,
}

impl<V> Clone for Aggregator<V> {
    fn clone(&self) -> Self {
        Aggregator { cell: Rc::clone(&self.cell) }
    }
}

impl<V: Clone + 'static> Aggregator<V> {
    /// Folds `value` into the worker-local copy.
    pub fn update(&self, value: &V) {
        let mut guard = self.cell.borrow_mut();
        let cell = &mut *guard;
        if !cell.updated {
            (cell.zero)(&mut cell.update);
            cell.updated = true;
        }
        (cell.combine)(&mut cell.update, value);
    }

    /// Mutates the worker-local copy arbitrarily.
    pub fn update_any(&self, f: impl FnOnce(&mut V)) {
        let mut guard = self.cell.borrow_mut();
        let cell = &mut *guard;
        if !cell.updated {
            (cell.zero)(&mut cell.update);
            cell.updated = true;
        }
        f(&mut cell.update);
    }

    /// The reduced value as of the last sync (the initial value before the
    /// first sync).
    pub fn get_value(&self) -> V {
        self.cell.borrow().synced.clone()
    }

    /// Resets the reduction at every sync instead of keeping it.
    pub fn to_reset_each_iter(&self) {
        self.cell.borrow_mut().reset_each_iter = true;
    }

    /// Keeps the reduction across syncs (the default).
    pub fn to_keep_aggregate(&self) {
        self.cell.borrow_mut().reset_each_iter = false;
    }

    /// Includes the aggregator in synchronization again.
    pub fn activate(&self) {
        self.cell.borrow_mut().active = true;
    }

    /// Excludes the aggregator from synchronization; updates are still
    /// accepted and kept.
    pub fn inactivate(&self) {
        self.cell.borrow_mut().active = false;
    }
}

/// The per-worker owner of aggregator state.
pub struct AggregatorFactory {
    local_id: usize,
    worker_info: Arc<WorkerInfo>,
    shared: Arc<AggregatorShared>,
    channel: AggregatorChannel,
    cells: Vec<Rc<RefCell<dyn AggregatorSyncOps>>>,
}

impl AggregatorFactory {
    pub(crate) fn new(
        local_id: usize,
        worker_info: Arc<WorkerInfo>,
        shared: Arc<AggregatorShared>,
        channel: AggregatorChannel,
    ) -> Self {
        AggregatorFactory { local_id, worker_info, shared, channel, cells: Vec::new() }
    }

    /// Creates an aggregator whose value type carries its own codec.
    ///
    /// The initial value must be the identity of `combine`; supply an
    /// explicit zero with [`create_aggregator_full`](Self::create_aggregator_full)
    /// otherwise.
    pub fn create_aggregator<V>(
        &mut self,
        init: V,
        combine: impl Fn(&mut V, &V) + 'static,
    ) -> Aggregator<V>
    where
        V: Clone + Serialize + 'static,
    {
        let zero_to = init.clone();
        self.create_aggregator_full(
            init,
            combine,
            move |value: &mut V| *value = zero_to.clone(),
            |bin: &mut BinStream| bin.pop::<V>(),
            |bin: &mut BinStream, value: &V| bin.push(value),
        )
    }

    /// Creates an aggregator with explicit combine, zero, and codec hooks.
    pub fn create_aggregator_full<V: Clone + 'static>(
        &mut self,
        init: V,
        combine: impl Fn(&mut V, &V) + 'static,
        zero: impl Fn(&mut V) + 'static,
        load: impl Fn(&mut BinStream) -> V + 'static,
        save: impl Fn(&mut BinStream, &V) + 'static,
    ) -> Aggregator<V> {
        let cell = Rc::new(RefCell::new(AggregatorCell {
            update: init.clone(),
            updated: false,
            synced: init.clone(),
            init,
            center: None,
            scratch: None,
            combine: Box::new(combine),
            zero: Box::new(zero),
            load: Box::new(load),
            save: Box::new(save),
            reset_each_iter: false,
            active: true,
        }));
        self.cells.push(cell.clone());
        Aggregator { cell }
    }

    /// Number of aggregators created by this worker.
    pub fn num_aggregators(&self) -> usize {
        self.cells.len()
    }

    /// One synchronization round; every worker of the cluster must call
    /// this together.
    pub fn sync(&mut self) {
        let num_aggs = self.cells.len();
        if num_aggs == 0 {
            return;
        }
        let info = Arc::clone(&self.worker_info);
        let num_local = info.num_local_workers();
        let num_procs = info.num_processes();
        let my_pid = info.process_id();

        let active: Vec<bool> =
            self.cells.iter().map(|cell| cell.borrow().is_active()).collect();

        // Publish this worker's partials.
        {
            let mut slots = self.shared.slots.lock().expect("aggregator slots poisoned");
            if slots.len() < num_local {
                slots.resize_with(num_local, Vec::new);
            }
            let mine = &mut slots[self.local_id];
            mine.clear();
            mine.resize_with(num_aggs, || None);
            for (idx, cell) in self.cells.iter().enumerate() {
                if !active[idx] {
                    continue;
                }
                let mut bin = BinStream::new();
                cell.borrow_mut().save_partial(&mut bin);
                mine[idx] = Some(bin);
            }
        }
        self.shared.barrier.wait(num_local);

        // Local centers fold the process's partials and address them to the
        // aggregator's global center worker.
        let mut outgoing: HashMap<usize, BinStream> = HashMap::new();
        for idx in (self.local_id..num_aggs).step_by(num_local) {
            if !active[idx] {
                continue;
            }
            let mut cell = self.cells[idx].borrow_mut();
            cell.begin_merge();
            {
                let mut slots = self.shared.slots.lock().expect("aggregator slots poisoned");
                for worker in 0..num_local {
                    if let Some(mut bin) = slots[worker].get_mut(idx).and_then(Option::take) {
                        cell.merge_partial(&mut bin);
                    }
                }
            }
            let center_pid = idx % num_procs;
            let center_local = idx % info.num_local_workers_of(center_pid);
            let dst = info.local_to_global(center_pid, center_local);

            let mut partial = BinStream::new();
            cell.save_merged(&mut partial);
            let buffer = outgoing.entry(dst).or_default();
            buffer.push(&(idx as u32));
            buffer.push(&partial);
        }

        // This worker's centered aggregators start their round before any
        // partial can arrive.
        let centers_here: Vec<usize> = (0..num_aggs)
            .filter(|&idx| {
                active[idx]
                    && idx % num_procs == my_pid
                    && idx % info.num_local_workers_of(my_pid) == self.local_id
            })
            .collect();
        for &idx in &centers_here {
            self.cells[idx].borrow_mut().begin_center_round();
        }

        let cells = &self.cells;
        self.channel.exchange(outgoing.into_iter().collect(), |mut bin| {
            while !bin.is_empty() {
                let idx = bin.pop::<u32>() as usize;
                let mut partial = bin.pop::<BinStream>();
                cells[idx].borrow_mut().absorb_center(&mut partial);
            }
        });

        // Centers broadcast the reduced value to every process's local
        // center for the aggregator.
        let mut outgoing: HashMap<usize, BinStream> = HashMap::new();
        for &idx in &centers_here {
            let mut value = BinStream::new();
            self.cells[idx].borrow_mut().save_center(&mut value);
            for pid in 0..num_procs {
                let local_center = idx % info.num_local_workers_of(pid);
                let dst = info.local_to_global(pid, local_center);
                let buffer = outgoing.entry(dst).or_default();
                buffer.push(&(idx as u32));
                buffer.push(&value);
            }
        }

        let shared = &self.shared;
        self.channel.exchange(outgoing.into_iter().collect(), |mut bin| {
            let mut synced = shared.synced.lock().expect("aggregator synced poisoned");
            if synced.len() < num_aggs {
                synced.resize_with(num_aggs, || None);
            }
            while !bin.is_empty() {
                let idx = bin.pop::<u32>() as usize;
                let value = bin.pop::<BinStream>();
                synced[idx] = Some(value);
            }
        });

        // Every worker installs the broadcast values.
        self.shared.barrier.wait(num_local);
        let synced = self.shared.synced.lock().expect("aggregator synced poisoned");
        for (idx, cell) in self.cells.iter().enumerate() {
            if !active[idx] {
                continue;
            }
            if let Some(bin) = synced.get(idx).and_then(Option::as_ref) {
                let mut copy = bin.clone();
                cell.borrow_mut().load_synced(&mut copy);
            }
        }
    }
}
