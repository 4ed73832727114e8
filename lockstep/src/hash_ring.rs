//! The consistent mapping from object keys to owning workers.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use lockstep_bytes::{BinStream, Serialize};

const JUMP_MULTIPLIER: u64 = 2862933555777941757;

/// Jump-consistent hashing over the set of global worker ids.
///
/// For a fixed member set, `lookup` is a pure function of the hash; changing
/// membership by one worker remaps only about `1/n` of the key space.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashRing {
    workers: BTreeSet<usize>,
}

impl HashRing {
    /// An empty ring.
    pub fn new() -> Self {
        HashRing::default()
    }

    /// A ring over workers `0..num_workers`.
    pub fn uniform(num_workers: usize) -> Self {
        HashRing { workers: (0..num_workers).collect() }
    }

    /// Adds a worker id.
    pub fn insert(&mut self, worker_id: usize) {
        self.workers.insert(worker_id);
    }

    /// Removes a worker id.
    pub fn remove(&mut self, worker_id: usize) {
        self.workers.remove(&worker_id);
    }

    /// Number of member workers.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Member worker ids, ascending.
    pub fn members(&self) -> Vec<usize> {
        self.workers.iter().copied().collect()
    }

    /// Maps a 64-bit hash to the owning worker id.
    pub fn lookup(&self, mut pos: u64) -> usize {
        let num = self.workers.len() as i64;
        let mut b: i64 = 1;
        let mut j: i64 = 0;
        while j < num {
            b = j;
            pos = pos.wrapping_mul(JUMP_MULTIPLIER).wrapping_add(1);
            j = ((b + 1) as f64 * ((1i64 << 31) as f64 / ((pos >> 33) + 1) as f64)) as i64;
        }
        b as usize
    }

    /// Maps a key to the owning worker id through the default hasher.
    pub fn hash_lookup<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.lookup(hasher.finish())
    }
}

impl Serialize for HashRing {
    fn serialize(&self, bin: &mut BinStream) {
        bin.push(&self.workers.len());
        for worker in &self.workers {
            bin.push(worker);
        }
    }
    fn deserialize(bin: &mut BinStream) -> Self {
        let len = bin.pop::<usize>();
        let mut ring = HashRing::new();
        for _ in 0..len {
            ring.insert(bin.pop::<usize>());
        }
        ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_total_and_stable() {
        let ring = HashRing::uniform(8);
        for hash in (0..10_000u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15)) {
            let owner = ring.lookup(hash);
            assert!(owner < 8);
            assert_eq!(owner, ring.lookup(hash));
        }
    }

    #[test]
    fn hash_lookup_agrees_with_itself() {
        let ring = HashRing::uniform(5);
        assert_eq!(ring.hash_lookup("a key"), ring.hash_lookup("a key"));
        assert_eq!(ring.hash_lookup(&42u64), ring.hash_lookup(&42u64));
    }

    #[test]
    fn serialize_round_trip() {
        let ring = HashRing::uniform(6);
        let mut bin = BinStream::new();
        bin.push(&ring);
        assert_eq!(bin.pop::<HashRing>(), ring);
    }

    #[test]
    fn growth_remaps_a_small_fraction() {
        use rand::{rngs::SmallRng, Rng, SeedableRng};

        let small = HashRing::uniform(10);
        let large = HashRing::uniform(11);

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let samples = 20_000;
        let moved = (0..samples)
            .map(|_| rng.gen::<u64>())
            .filter(|&h| small.lookup(h) != large.lookup(h))
            .count();

        // Adding one of eleven workers should remap about 1/11 of keys.
        let expected = samples / 11;
        assert!(moved < expected * 3 / 2, "{} of {} keys moved", moved, samples);
    }
}
