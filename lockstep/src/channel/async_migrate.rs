//! Migration without superstep synchronization.

use std::any::Any;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use super::migrate::MigrateChannel;
use crate::objlist::{Keyed, ObjList};

/// A [`MigrateChannel`] whose flush neither advances progress nor announces
/// completion; receivers drain immigrants with a timeout until their own
/// stopping condition holds.
pub struct AsyncMigrateChannel<T: Keyed + Serialize> {
    inner: MigrateChannel<T>,
}

impl<T: Keyed + Serialize> AsyncMigrateChannel<T> {
    pub(crate) fn new(channel_id: u32, res: &ChannelResources) -> Self {
        let mut inner = MigrateChannel::new(channel_id, res);
        inner.base.set_async();
        AsyncMigrateChannel { inner }
    }

    /// Serializes the object at `idx` for `dst_worker` and lazily deletes
    /// it from `list`.
    pub fn migrate(&mut self, list: &mut ObjList<T>, idx: usize, dst_worker: usize) {
        self.inner.migrate(list, idx, dst_worker);
    }

    /// Sends every buffer at the current progress; no completion follows.
    pub fn flush(&mut self) {
        let num = self.inner.migrate_buffer.len();
        let start = self.inner.base.global_id();
        for step in 0..num {
            let dst = (start + step) % num;
            let bin = std::mem::take(&mut self.inner.migrate_buffer[dst]);
            self.inner.base.mailbox().send(
                dst,
                self.inner.base.channel_id(),
                self.inner.base.progress(),
                bin,
            );
        }
    }

    /// Drains arriving objects until `timeout_secs` passes with nothing
    /// new.
    pub fn drain_with_timeout(&mut self, list: &mut ObjList<T>, timeout_secs: f64) {
        let channel_id = self.inner.base.channel_id();
        let progress = self.inner.base.progress();
        while self.inner.base.mailbox().poll_with_timeout(channel_id, progress, timeout_secs) {
            let bin = self.inner.base.mailbox().recv(channel_id, progress);
            self.inner.process_bin(list, bin);
        }
    }
}

impl<T: Keyed + Serialize> ChannelHooks for AsyncMigrateChannel<T> {
    fn base(&self) -> &ChannelBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut ChannelBase {
        self.inner.base_mut()
    }

    fn process_in(&mut self, dst: &mut dyn Any, bin: BinStream) {
        self.inner.process_in(dst, bin);
    }

    fn flush_out(&mut self) {
        self.flush();
    }
}
