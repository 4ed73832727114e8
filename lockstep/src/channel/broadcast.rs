//! Cluster-wide key/value broadcast with per-process hosting.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use crate::accessor::Accessor;

fn key_hash<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Delivers a key→value dictionary to every worker.
///
/// Each process elects one hosting local worker per key
/// (`hash(key) % local workers`); one copy per process travels to that
/// worker, which publishes it in a shared accessor cell that every local
/// worker reads. With [`set_clear_dict`](BroadcastChannel::set_clear_dict)
/// the hosted dictionaries reset each progress; otherwise entries persist.
pub struct BroadcastChannel<K, V>
where
    K: Clone + Eq + Hash + Serialize + 'static,
    V: Clone + Serialize + 'static,
{
    base: ChannelBase,
    broadcast_buffer: Vec<BinStream>,
    accessors: Arc<Vec<Accessor<HashMap<K, V>>>>,
    clear_dict_each_progress: bool,
    need_leave: bool,
}

impl<K, V> BroadcastChannel<K, V>
where
    K: Clone + Eq + Hash + Serialize + Send + 'static,
    V: Clone + Serialize + Send + 'static,
{
    pub(crate) fn new(
        channel_id: u32,
        res: &ChannelResources,
        accessors: Arc<Vec<Accessor<HashMap<K, V>>>>,
    ) -> Self {
        let base = ChannelBase::new(channel_id, res);
        let slots = res.worker_info.largest_tid() + 1;
        BroadcastChannel {
            base,
            broadcast_buffer: (0..slots).map(|_| BinStream::new()).collect(),
            accessors,
            clear_dict_each_progress: false,
            need_leave: false,
        }
    }

    /// Whether hosted dictionaries reset at each progress.
    pub fn set_clear_dict(&mut self, clear: bool) {
        self.clear_dict_each_progress = clear;
    }

    /// Queues `key → value` for the hosting worker of every process.
    pub fn broadcast(&mut self, key: &K, value: &V) {
        let info = self.base.worker_info();
        let hash = key_hash(key);
        for pid in 0..info.num_processes() {
            let hosting_local = (hash % info.num_local_workers_of(pid) as u64) as usize;
            let dst = info.local_to_global(pid, hosting_local);
            let buffer = &mut self.broadcast_buffer[dst];
            buffer.push(key);
            buffer.push(value);
        }
    }

    /// The authoritative value for `key` this progress. Missing keys are a
    /// contract violation; use [`try_get`](Self::try_get) when absence is
    /// expected.
    pub fn get(&self, key: &K) -> V {
        self.try_get(key)
            .unwrap_or_else(|| panic!("BroadcastChannel::get: key not found"))
    }

    /// The value for `key`, if any worker broadcast it.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let generation = u64::from(self.base.progress());
        self.hosting_cell(key).with(generation, |dict| dict.get(key).cloned())
    }

    /// Whether `key` has an authoritative value this progress.
    pub fn contains(&self, key: &K) -> bool {
        self.try_get(key).is_some()
    }

    /// Flushes queued entries and publishes the dictionaries for this
    /// progress.
    pub fn out(&mut self) {
        self.flush();
        self.prepare_broadcast();
    }

    fn hosting_cell(&self, key: &K) -> &Accessor<HashMap<K, V>> {
        let local_workers = self.accessors.len() as u64;
        &self.accessors[(key_hash(key) % local_workers) as usize]
    }

    fn flush(&mut self) {
        self.base.inc_progress();
        let num = self.broadcast_buffer.len();
        let start = self.base.global_id();
        for step in 0..num {
            let dst = (start + step) % num;
            if self.broadcast_buffer[dst].is_empty() {
                continue;
            }
            let bin = std::mem::take(&mut self.broadcast_buffer[dst]);
            self.base.mailbox().send(dst, self.base.channel_id(), self.base.progress(), bin);
        }
        let members = self.base.hash_ring().members();
        self.base
            .mailbox()
            .send_complete(self.base.channel_id(), self.base.progress(), &members, &members);
    }

    /// Releases the previous generation, drains this worker's hosted
    /// entries, and commits the new dictionary.
    fn prepare_broadcast(&mut self) {
        if self.need_leave {
            for cell in self.accessors.iter() {
                cell.leave();
            }
        }
        self.need_leave = true;

        let cell = &self.accessors[self.base.local_id()];
        let mailbox = self.base.mailbox();
        let channel_id = self.base.channel_id();
        let progress = self.base.progress();
        let clear = self.clear_dict_each_progress;
        cell.update(|dict| {
            if clear {
                dict.clear();
            }
            while mailbox.poll(channel_id, progress) {
                let mut bin = mailbox.recv(channel_id, progress);
                while !bin.is_empty() {
                    let key = bin.pop::<K>();
                    let value = bin.pop::<V>();
                    dict.insert(key, value);
                }
            }
        });
        cell.commit();
    }
}

impl<K, V> ChannelHooks for BroadcastChannel<K, V>
where
    K: Clone + Eq + Hash + Serialize + Send + 'static,
    V: Clone + Serialize + Send + 'static,
{
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn flush_out(&mut self) {
        self.out();
    }
}
