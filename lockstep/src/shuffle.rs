//! The intra-process shuffle used by the combined push channel.
//!
//! Every local worker owns one slot holding per-destination buffers of
//! `(key, message)` pairs. At flush, each worker publishes its slot and then
//! combines the residue class of destinations `d ≡ local_id (mod L)` across
//! all slots, so each key bound for a given worker is pre-combined exactly
//! once per process before it reaches the wire.
//!
//! The ready handshake is an in-process rendezvous: a generation gate per
//! slot, advanced on publish and awaited by peers. No peer touches a slot's
//! buffers before its owner has published the current round.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Per-channel shuffle state shared by the local workers of one process.
pub struct ShuffleCombinerSet<K, V> {
    slots: Vec<Slot<K, V>>,
    num_local_workers: usize,
    num_destinations: usize,
}

struct Slot<K, V> {
    buffers: Mutex<Vec<Vec<(K, V)>>>,
    gate: Gate,
}

#[derive(Default)]
struct Gate {
    generation: Mutex<u64>,
    advanced: Condvar,
}

impl Gate {
    fn advance(&self) {
        let mut generation = self.generation.lock().expect("shuffle gate poisoned");
        *generation += 1;
        self.advanced.notify_all();
    }

    fn await_generation(&self, target: u64) {
        let mut generation = self.generation.lock().expect("shuffle gate poisoned");
        while *generation < target {
            generation = self.advanced.wait(generation).expect("shuffle gate poisoned");
        }
    }
}

impl<K, V> ShuffleCombinerSet<K, V> {
    /// Creates the shared state for `num_local_workers` slots over
    /// `num_destinations` destination workers.
    pub fn new(num_local_workers: usize, num_destinations: usize) -> Self {
        let slots = (0..num_local_workers)
            .map(|_| Slot {
                buffers: Mutex::new((0..num_destinations).map(|_| Vec::new()).collect()),
                gate: Gate::default(),
            })
            .collect();
        ShuffleCombinerSet { slots, num_local_workers, num_destinations }
    }

    /// Number of local workers sharing the set.
    pub fn num_local_workers(&self) -> usize {
        self.num_local_workers
    }

    /// Number of destination slots.
    pub fn num_destinations(&self) -> usize {
        self.num_destinations
    }

    /// Publishes a worker's round of buffers into its slot and signals
    /// readiness.
    pub fn publish(&self, local_id: usize, buffers: &mut [Vec<(K, V)>]) {
        {
            let mut slot = self.slots[local_id].buffers.lock().expect("shuffle slot poisoned");
            for (dst, buffer) in buffers.iter_mut().enumerate() {
                slot[dst].append(buffer);
            }
        }
        self.slots[local_id].gate.advance();
    }

    /// Waits until `local_id` has published round `round`.
    pub fn await_round(&self, local_id: usize, round: u64) {
        self.slots[local_id].gate.await_generation(round);
    }

    /// Takes the pairs every worker accumulated for destination `dst`.
    /// Callers for distinct residue classes touch disjoint destinations.
    pub fn drain_destination(&self, dst: usize) -> Vec<(K, V)> {
        let mut drained = Vec::new();
        for slot in &self.slots {
            let mut buffers = slot.buffers.lock().expect("shuffle slot poisoned");
            drained.append(&mut buffers[dst]);
        }
        drained
    }
}

/// Process-global registry of shuffle sets, keyed by channel id and
/// reference-counted per attached worker.
#[derive(Default)]
pub struct ShuffleCombinerStore {
    sets: Mutex<HashMap<u32, (usize, Arc<dyn Any + Send + Sync>)>>,
}

impl ShuffleCombinerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        ShuffleCombinerStore::default()
    }

    /// Fetches the set for `channel_id`, creating it on first use, and
    /// counts the caller as one attached worker.
    pub fn get_or_create<K, V>(
        &self,
        channel_id: u32,
        num_local_workers: usize,
        num_destinations: usize,
    ) -> Arc<ShuffleCombinerSet<K, V>>
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let mut sets = self.sets.lock().expect("shuffle store poisoned");
        let entry = sets.entry(channel_id).or_insert_with(|| {
            (0, Arc::new(ShuffleCombinerSet::<K, V>::new(num_local_workers, num_destinations)))
        });
        entry.0 += 1;
        Arc::clone(&entry.1)
            .downcast::<ShuffleCombinerSet<K, V>>()
            .unwrap_or_else(|_| panic!("shuffle set {} registered with a different message type", channel_id))
    }

    /// Releases one worker's reference; the set is dropped when the last
    /// attached worker releases it.
    pub fn release(&self, channel_id: u32) {
        let mut sets = self.sets.lock().expect("shuffle store poisoned");
        if let Some(entry) = sets.get_mut(&channel_id) {
            entry.0 -= 1;
            if entry.0 == 0 {
                sets.remove(&channel_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::{combine_single, SumCombiner};

    #[test]
    fn residue_classes_combine_once() {
        let local_workers = 2;
        let destinations = 4;
        let set = Arc::new(ShuffleCombinerSet::<u32, i64>::new(local_workers, destinations));

        std::thread::scope(|scope| {
            for me in 0..local_workers {
                let set = Arc::clone(&set);
                scope.spawn(move || {
                    // Every worker contributes one pair per destination.
                    let mut buffers: Vec<Vec<(u32, i64)>> =
                        (0..destinations).map(|dst| vec![(dst as u32, 1i64), (dst as u32, 2)]).collect();
                    set.publish(me, &mut buffers);
                    for peer in 0..local_workers {
                        set.await_round(peer, 1);
                    }
                    for dst in (me..destinations).step_by(local_workers) {
                        let mut combined = set.drain_destination(dst);
                        combine_single::<SumCombiner<i64>, _, _>(&mut combined);
                        assert_eq!(combined, vec![(dst as u32, 6)]);
                    }
                });
            }
        });
    }

    #[test]
    fn store_shares_and_refcounts() {
        let store = ShuffleCombinerStore::new();
        let a = store.get_or_create::<u32, i64>(7, 2, 4);
        let b = store.get_or_create::<u32, i64>(7, 2, 4);
        assert!(Arc::ptr_eq(&a, &b));
        store.release(7);
        store.release(7);
        let c = store.get_or_create::<u32, i64>(7, 3, 6);
        assert_eq!(c.num_local_workers(), 3);
    }
}
