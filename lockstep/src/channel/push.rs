//! Keyed message push between object lists.

use std::any::Any;
use std::marker::PhantomData;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use crate::objlist::{Keyed, ObjList};

/// Delivers `[key, msg]` pairs to the ring-owner of each key; the receiver
/// finds or creates the destination object and buffers every message
/// addressed to it, readable with [`get_at`](PushChannel::get_at) in the
/// next superstep.
pub struct PushChannel<M: Serialize, T: Keyed> {
    pub(crate) base: ChannelBase,
    pub(crate) send_buffer: Vec<BinStream>,
    pub(crate) recv_buffer: Vec<Vec<M>>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<M: Serialize + 'static, T: Keyed> PushChannel<M, T> {
    pub(crate) fn new(channel_id: u32, res: &ChannelResources) -> Self {
        let base = ChannelBase::new(channel_id, res);
        let slots = res.worker_info.largest_tid() + 1;
        PushChannel {
            base,
            send_buffer: (0..slots).map(|_| BinStream::new()).collect(),
            recv_buffer: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Buffers `msg` for the object with `key` on its owning worker.
    pub fn push(&mut self, msg: &M, key: &T::Key) {
        let dst_worker = self.base.hash_ring().hash_lookup(key);
        let buffer = &mut self.send_buffer[dst_worker];
        buffer.push(key);
        buffer.push(msg);
    }

    /// Sends the buffered messages at the next progress and announces
    /// completion over the ring membership.
    pub fn flush(&mut self) {
        self.base.inc_progress();
        let num = self.send_buffer.len();
        let start = self.base.global_id();
        for step in 0..num {
            let dst = (start + step) % num;
            if self.send_buffer[dst].is_empty() {
                continue;
            }
            let bin = std::mem::take(&mut self.send_buffer[dst]);
            self.base.mailbox().send(dst, self.base.channel_id(), self.base.progress(), bin);
        }
        let members = self.base.hash_ring().members();
        self.base
            .mailbox()
            .send_complete(self.base.channel_id(), self.base.progress(), &members, &members);
    }

    /// Messages delivered to the object at `idx` this superstep.
    pub fn get_at(&self, idx: usize) -> &[M] {
        self.recv_buffer.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Messages delivered to `obj`, which must live in `list`.
    pub fn get<'a>(&'a self, list: &ObjList<T>, obj: &T) -> &'a [M] {
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

    pub(crate) fn clear_recv_buffer(&mut self) {
        for messages in &mut self.recv_buffer {
            messages.clear();
        }
    }

    pub(crate) fn process_bin(&mut self, list: &mut ObjList<T>, mut bin: BinStream) {
        while !bin.is_empty() {
            let key = bin.pop::<T::Key>();
            let msg = bin.pop::<M>();
            let idx = match list.find_index(&key) {
                Some(idx) => idx,
                None => list.add_object(T::with_key(key)),
            };
            if idx >= self.recv_buffer.len() {
                self.recv_buffer.resize_with(idx + 1, Vec::new);
            }
            self.recv_buffer[idx].push(msg);
        }
    }
}

impl<M: Serialize + 'static, T: Keyed> ChannelHooks for PushChannel<M, T> {
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
            .expect("PushChannel: destination list has the wrong object type");
        self.process_bin(list, bin);
    }

    fn flush_out(&mut self) {
        self.flush();
    }
}
