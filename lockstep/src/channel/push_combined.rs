//! Keyed push with intra-process pre-combining.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use crate::combiner::{back_combine, combine_single, Combiner};
use crate::objlist::{Keyed, ObjList};
use crate::shuffle::ShuffleCombinerSet;

/// Like [`PushChannel`](super::PushChannel), but outgoing messages pass
/// through the process-local shuffle so that each key is combined exactly
/// once per process before serialization, and the receiver keeps a single
/// combined value per destination object.
pub struct PushCombinedChannel<M, T, C>
where
    M: Serialize + PartialEq + 'static,
    T: Keyed,
    C: Combiner<M>,
{
    pub(crate) base: ChannelBase,
    buffers: Vec<Vec<(T::Key, M)>>,
    shuffle: Arc<ShuffleCombinerSet<T::Key, M>>,
    round: u64,
    send_buffer: Vec<BinStream>,
    recv_buffer: Vec<Option<M>>,
    _marker: PhantomData<fn() -> C>,
}

impl<M, T, C> PushCombinedChannel<M, T, C>
where
    M: Serialize + PartialEq + Send + 'static,
    T: Keyed,
    T::Key: Send,
    C: Combiner<M>,
{
    pub(crate) fn new(
        channel_id: u32,
        res: &ChannelResources,
        shuffle: Arc<ShuffleCombinerSet<T::Key, M>>,
    ) -> Self {
        let base = ChannelBase::new(channel_id, res);
        let slots = res.worker_info.largest_tid() + 1;
        PushCombinedChannel {
            base,
            buffers: (0..slots).map(|_| Vec::new()).collect(),
            shuffle,
            round: 0,
            send_buffer: (0..slots).map(|_| BinStream::new()).collect(),
            recv_buffer: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Folds `msg` into the outgoing buffer of `key`'s owning worker.
    pub fn push(&mut self, msg: M, key: &T::Key) {
        let dst_worker = self.base.hash_ring().hash_lookup(key);
        back_combine::<C, _, _>(&mut self.buffers[dst_worker], key.clone(), msg);
    }

    /// Shuffle-combines with the local peers, sends, and completes.
    pub fn flush(&mut self) {
        self.shuffle_combine();
        self.send();
        self.send_complete();
    }

    /// The combined value delivered to the object at `idx`, if any message
    /// addressed it.
    pub fn get_at(&self, idx: usize) -> Option<&M> {
        self.recv_buffer.get(idx).and_then(Option::as_ref)
    }

    /// Whether any message addressed the object at `idx` this superstep.
    pub fn has_msgs_at(&self, idx: usize) -> bool {
        self.get_at(idx).is_some()
    }

    /// The combined value delivered to `obj`, which must live in `list`.
    pub fn get<'a>(&'a self, list: &ObjList<T>, obj: &T) -> Option<&'a M> {
        self.get_at(list.index_of(obj))
    }

    /// Drains the mailbox for the current progress outside of
    /// `list_execute`.
    pub fn prepare_messages(&mut self, list: &mut ObjList<T>) {
        if !self.base.is_flushed() {
            return;
        }
        self.clear_recv_buffer();
        while self.base.mailbox().poll(self.base.channel_id(), self.base.progress()) {
            let bin = self.base.mailbox().recv(self.base.channel_id(), self.base.progress());
            self.process_bin(list, bin);
        }
        self.base.reset_flushed();
    }

    /// Each destination class `d ≡ local_id (mod L)` is gathered from every
    /// local worker, combined once, and serialized.
    fn shuffle_combine(&mut self) {
        let local_id = self.base.local_id();
        let local_workers = self.shuffle.num_local_workers();
        let destinations = self.shuffle.num_destinations();

        self.round += 1;
        self.shuffle.publish(local_id, &mut self.buffers);
        for peer in 0..local_workers {
            if peer != local_id {
                self.shuffle.await_round(peer, self.round);
            }
        }

        for dst in (local_id..destinations).step_by(local_workers) {
            let mut combined = self.shuffle.drain_destination(dst);
            combine_single::<C, _, _>(&mut combined);
            let buffer = &mut self.send_buffer[dst];
            for (key, msg) in &combined {
                buffer.push(key);
                buffer.push(msg);
            }
        }
    }

    /// Sends at the upcoming progress; the progress counter itself advances
    /// in [`send_complete`](Self::send_complete).
    fn send(&mut self) {
        let num = self.send_buffer.len();
        let start = self.base.global_id();
        let next_progress = self.base.progress() + 1;
        for step in 0..num {
            let dst = (start + step) % num;
            if self.send_buffer[dst].is_empty() {
                continue;
            }
            let bin = std::mem::take(&mut self.send_buffer[dst]);
            self.base.mailbox().send(dst, self.base.channel_id(), next_progress, bin);
        }
    }

    fn send_complete(&mut self) {
        self.base.inc_progress();
        let all = self.base.worker_info().global_tids();
        self.base.mailbox().send_complete(self.base.channel_id(), self.base.progress(), &all, &all);
    }

    fn clear_recv_buffer(&mut self) {
        for value in &mut self.recv_buffer {
            *value = None;
        }
    }

    fn process_bin(&mut self, list: &mut ObjList<T>, mut bin: BinStream) {
        while !bin.is_empty() {
            let key = bin.pop::<T::Key>();
            let msg = bin.pop::<M>();
            let idx = match list.find_index(&key) {
                Some(idx) => idx,
                None => list.add_object(T::with_key(key)),
            };
            if idx >= self.recv_buffer.len() {
                self.recv_buffer.resize_with(idx + 1, || None);
            }
            match &mut self.recv_buffer[idx] {
                Some(value) => C::combine(value, &msg),
                slot @ None => *slot = Some(msg),
            }
        }
    }
}

impl<M, T, C> ChannelHooks for PushCombinedChannel<M, T, C>
where
    M: Serialize + PartialEq + Send + 'static,
    T: Keyed,
    T::Key: Send,
    C: Combiner<M>,
{
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn prepare(&mut self, _dst: &mut dyn Any) {
        self.clear_recv_buffer();
    }

    fn process_in(&mut self, dst: &mut dyn Any, bin: BinStream) {
        let list = dst
            .downcast_mut::<ObjList<T>>()
            .expect("PushCombinedChannel: destination list has the wrong object type");
        self.process_bin(list, bin);
    }

    fn flush_out(&mut self) {
        self.flush();
    }
}
