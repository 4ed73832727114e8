//! Superstep orchestration over a set of channels.

use lockstep_communication::LocalMailbox;

use super::base::ChannelHandle;
use crate::objlist::{Keyed, ObjList};

/// Distributes inbound streams to flushed channels and flushes outbound
/// channels at superstep boundaries.
pub struct ChannelManager<'a> {
    channels: &'a [ChannelHandle],
}

impl<'a> ChannelManager<'a> {
    /// Wraps a set of channels for one superstep.
    pub fn new(channels: &'a [ChannelHandle]) -> Self {
        ChannelManager { channels }
    }

    /// Polls the mailbox for every flushed channel's current tag and hands
    /// each delivered stream to its channel, then clears the flush bits.
    pub fn poll_and_distribute<T: Keyed>(&self, mailbox: &LocalMailbox, list: &mut ObjList<T>) {
        let mut selected = Vec::new();
        let mut tags = Vec::new();
        for handle in self.channels {
            let mut channel = handle.borrow_mut();
            if channel.base().is_flushed() {
                channel.prepare(list);
                tags.push((channel.base().channel_id(), channel.base().progress()));
                selected.push(handle);
            }
        }
        if tags.is_empty() {
            return;
        }

        while let Some(idx) = mailbox.poll_any(&tags) {
            let (channel_id, progress) = tags[idx];
            let bin = mailbox.recv(channel_id, progress);
            selected[idx].borrow_mut().process_in(list, bin);
        }

        for handle in &selected {
            handle.borrow_mut().base_mut().reset_flushed();
        }
    }

    /// Calls `flush_out` on every channel.
    pub fn flush(&self) {
        for handle in self.channels {
            handle.borrow_mut().flush_out();
        }
    }
}
