//! Object migration between workers.

use std::any::Any;
use std::marker::PhantomData;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use crate::objlist::{Keyed, ObjList};

/// Moves objects between lists of the same type, carrying every registered
/// attribute value along. The source slot is lazily deleted; the receiver
/// adds the object and normally sorts its list after the superstep.
pub struct MigrateChannel<T: Keyed + Serialize> {
    pub(crate) base: ChannelBase,
    pub(crate) migrate_buffer: Vec<BinStream>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Keyed + Serialize> MigrateChannel<T> {
    pub(crate) fn new(channel_id: u32, res: &ChannelResources) -> Self {
        let base = ChannelBase::new(channel_id, res);
        let slots = res.worker_info.largest_tid() + 1;
        MigrateChannel {
            base,
            migrate_buffer: (0..slots).map(|_| BinStream::new()).collect(),
            _marker: PhantomData,
        }
    }

    /// Serializes the object at `idx` (and its attributes) for
    /// `dst_worker` and lazily deletes it from `list`.
    pub fn migrate(&mut self, list: &mut ObjList<T>, idx: usize, dst_worker: usize) {
        list.delete_at(idx);
        let buffer = &mut self.migrate_buffer[dst_worker];
        buffer.push(list.get(idx));
        list.migrate_attribute(buffer, idx);
    }

    /// Sends every per-destination buffer (empty ones included) at the next
    /// progress and announces completion across all workers.
    pub fn flush(&mut self) {
        self.base.inc_progress();
        let num = self.migrate_buffer.len();
        let start = self.base.global_id();
        for step in 0..num {
            let dst = (start + step) % num;
            let bin = std::mem::take(&mut self.migrate_buffer[dst]);
            self.base.mailbox().send(dst, self.base.channel_id(), self.base.progress(), bin);
        }
        let all = self.base.worker_info().global_tids();
        self.base.mailbox().send_complete(self.base.channel_id(), self.base.progress(), &all, &all);
    }

    /// Drains arriving objects into `list` outside of `list_execute`.
    pub fn prepare_immigrants(&mut self, list: &mut ObjList<T>) {
        if !self.base.is_flushed() {
            return;
        }
        while self.base.mailbox().poll(self.base.channel_id(), self.base.progress()) {
            let bin = self.base.mailbox().recv(self.base.channel_id(), self.base.progress());
            self.process_bin(list, bin);
        }
        self.base.reset_flushed();
    }

    pub(crate) fn process_bin(&mut self, list: &mut ObjList<T>, mut bin: BinStream) {
        while !bin.is_empty() {
            let obj = bin.pop::<T>();
            let idx = list.add_object(obj);
            list.process_attribute(&mut bin, idx);
        }
    }
}

impl<T: Keyed + Serialize> ChannelHooks for MigrateChannel<T> {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn process_in(&mut self, dst: &mut dyn Any, bin: BinStream) {
        let list = dst
            .downcast_mut::<ObjList<T>>()
            .expect("MigrateChannel: destination list has the wrong object type");
        self.process_bin(list, bin);
    }

    fn flush_out(&mut self) {
        self.flush();
    }
}
