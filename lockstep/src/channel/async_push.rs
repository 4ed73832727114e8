//! Push without superstep synchronization.

use std::any::Any;

use lockstep_bytes::{BinStream, Serialize};

use super::base::{ChannelBase, ChannelHooks, ChannelResources};
use super::push::PushChannel;
use crate::objlist::{Keyed, ObjList};

/// A [`PushChannel`] whose flush neither advances progress nor announces
/// completion: all traffic stays on one tag, senders keep pushing, and
/// receivers poll non-blocking or with a timeout until they decide they
/// have seen enough.
pub struct AsyncPushChannel<M: Serialize + 'static, T: Keyed> {
    inner: PushChannel<M, T>,
}

impl<M: Serialize + 'static, T: Keyed> AsyncPushChannel<M, T> {
    pub(crate) fn new(channel_id: u32, res: &ChannelResources) -> Self {
        let mut inner = PushChannel::new(channel_id, res);
        inner.base.set_async();
        AsyncPushChannel { inner }
    }

    /// Buffers `msg` for the object with `key` on its owning worker.
    pub fn push(&mut self, msg: &M, key: &T::Key) {
        self.inner.push(msg, key);
    }

    /// Messages drained for the object at `idx` so far.
    pub fn get_at(&self, idx: usize) -> &[M] {
        self.inner.get_at(idx)
    }

    /// Sends every buffer at the current progress; no completion follows.
    pub fn flush(&mut self) {
        let num = self.inner.send_buffer.len();
        let start = self.inner.base.global_id();
        for step in 0..num {
            let dst = (start + step) % num;
            let bin = std::mem::take(&mut self.inner.send_buffer[dst]);
            self.inner.base.mailbox().send(
                dst,
                self.inner.base.channel_id(),
                self.inner.base.progress(),
                bin,
            );
        }
    }

    /// Clears receive state and drains arrivals until `timeout_secs` passes
    /// with nothing new.
    pub fn drain_with_timeout(&mut self, list: &mut ObjList<T>, timeout_secs: f64) {
        self.inner.clear_recv_buffer();
        let channel_id = self.inner.base.channel_id();
        let progress = self.inner.base.progress();
        while self.inner.base.mailbox().poll_with_timeout(channel_id, progress, timeout_secs) {
            let bin = self.inner.base.mailbox().recv(channel_id, progress);
            self.inner.process_bin(list, bin);
        }
    }

    /// Drains whatever is queued right now without waiting.
    pub fn drain_non_block(&mut self, list: &mut ObjList<T>) {
        let channel_id = self.inner.base.channel_id();
        let progress = self.inner.base.progress();
        while self.inner.base.mailbox().poll_non_block(channel_id, progress) {
            let bin = self.inner.base.mailbox().recv(channel_id, progress);
            self.inner.process_bin(list, bin);
        }
    }
}

impl<M: Serialize + 'static, T: Keyed> ChannelHooks for AsyncPushChannel<M, T> {
    fn base(&self) -> &ChannelBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut ChannelBase {
        self.inner.base_mut()
    }

    fn prepare(&mut self, _dst: &mut dyn Any) {
        self.inner.clear_recv_buffer();
    }

    fn process_in(&mut self, dst: &mut dyn Any, bin: BinStream) {
        self.inner.process_in(dst, bin);
    }

    fn flush_out(&mut self) {
        self.flush();
    }
}
