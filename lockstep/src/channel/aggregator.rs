//! The mailbox channel carrying aggregator synchronization rounds.

use std::rc::Rc;
use std::sync::Arc;

use lockstep_bytes::BinStream;
use lockstep_communication::{LocalMailbox, WorkerInfo};

use crate::constants::AGGREGATOR_CHANNEL_ID;

/// A thin synchronous channel on the reserved aggregator channel id. Every
/// worker takes part in every round's completion, whether or not it sends
/// or receives payloads.
pub struct AggregatorChannel {
    channel_id: u32,
    progress: u32,
    mailbox: Rc<LocalMailbox>,
    worker_info: Arc<WorkerInfo>,
}

impl AggregatorChannel {
    pub(crate) fn new(mailbox: Rc<LocalMailbox>, worker_info: Arc<WorkerInfo>) -> Self {
        AggregatorChannel { channel_id: AGGREGATOR_CHANNEL_ID, progress: 0, mailbox, worker_info }
    }

    /// Runs one all-participate round: sends each `(dst_tid, payload)`,
    /// completes across every worker, and hands each received stream to
    /// `on_recv`.
    pub fn exchange(&mut self, outgoing: Vec<(usize, BinStream)>, mut on_recv: impl FnMut(BinStream)) {
        self.progress += 1;
        for (dst, bin) in outgoing {
            if bin.is_empty() {
                continue;
            }
            self.mailbox.send(dst, self.channel_id, self.progress, bin);
        }
        let all = self.worker_info.global_tids();
        self.mailbox.send_complete(self.channel_id, self.progress, &all, &all);
        while self.mailbox.poll(self.channel_id, self.progress) {
            on_recv(self.mailbox.recv(self.channel_id, self.progress));
        }
    }
}
