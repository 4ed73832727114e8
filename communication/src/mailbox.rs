//! Per-worker inbound queues keyed by `(channel_id, progress)`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use lockstep_bytes::BinStream;

use crate::event_loop::MailboxEvent;
use crate::worker_info::WorkerInfo;

/// The tag demultiplexing inbound traffic: `(channel_id, progress)`.
pub type Tag = (u32, u32);

#[derive(Default)]
struct Cell {
    queue: VecDeque<BinStream>,
    complete: bool,
}

/// Inbound state of one worker: written by the event loop, drained by the
/// owning worker. Cells persist after completion so that repeated polls of a
/// finished tag keep returning `false`.
#[derive(Default)]
pub(crate) struct MailboxState {
    cells: Mutex<HashMap<Tag, Cell>>,
    available: Condvar,
}

impl MailboxState {
    pub(crate) fn deliver(&self, tag: Tag, payload: BinStream) {
        let mut cells = self.cells.lock().expect("mailbox poisoned");
        cells.entry(tag).or_default().queue.push_back(payload);
        self.available.notify_all();
    }

    pub(crate) fn mark_complete(&self, tag: Tag) {
        let mut cells = self.cells.lock().expect("mailbox poisoned");
        cells.entry(tag).or_default().complete = true;
        self.available.notify_all();
    }
}

/// A worker thread's interface to the communication substrate.
///
/// Payloads and completions for distinct tags are independent: a slow
/// consumer on one tag never blocks another. Per sender, payloads for a tag
/// are delivered in send order, and the completion for a tag is observed
/// only after every payload sent on it.
pub struct LocalMailbox {
    thread_id: usize,
    state: Arc<MailboxState>,
    events: Sender<MailboxEvent>,
    worker_info: Arc<WorkerInfo>,
}

impl LocalMailbox {
    pub(crate) fn new(
        thread_id: usize,
        state: Arc<MailboxState>,
        events: Sender<MailboxEvent>,
        worker_info: Arc<WorkerInfo>,
    ) -> Self {
        LocalMailbox { thread_id, state, events, worker_info }
    }

    /// Global worker id owning this mailbox.
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// The cluster directory this mailbox routes against.
    pub fn worker_info(&self) -> &Arc<WorkerInfo> {
        &self.worker_info
    }

    /// Blocks until a payload for the tag is available (`true`) or the tag
    /// has completed with an empty queue (`false`).
    pub fn poll(&self, channel_id: u32, progress: u32) -> bool {
        let tag = (channel_id, progress);
        let mut cells = self.state.cells.lock().expect("mailbox poisoned");
        loop {
            let cell = cells.entry(tag).or_default();
            if !cell.queue.is_empty() {
                return true;
            }
            if cell.complete {
                return false;
            }
            cells = self.state.available.wait(cells).expect("mailbox poisoned");
        }
    }

    /// Polls several tags at once; returns the index of a tag with an
    /// available payload, or `None` once every tag has completed and
    /// drained.
    pub fn poll_any(&self, tags: &[Tag]) -> Option<usize> {
        if tags.is_empty() {
            return None;
        }
        let mut cells = self.state.cells.lock().expect("mailbox poisoned");
        loop {
            let mut all_done = true;
            for (idx, tag) in tags.iter().enumerate() {
                let cell = cells.entry(*tag).or_default();
                if !cell.queue.is_empty() {
                    return Some(idx);
                }
                all_done &= cell.complete;
            }
            if all_done {
                return None;
            }
            cells = self.state.available.wait(cells).expect("mailbox poisoned");
        }
    }

    /// Never blocks; `true` iff a payload is queued right now.
    pub fn poll_non_block(&self, channel_id: u32, progress: u32) -> bool {
        let cells = self.state.cells.lock().expect("mailbox poisoned");
        cells.get(&(channel_id, progress)).map_or(false, |cell| !cell.queue.is_empty())
    }

    /// Bounded wait; `true` iff a payload became available before the
    /// timeout. Completion of the tag also ends the wait.
    pub fn poll_with_timeout(&self, channel_id: u32, progress: u32, timeout_secs: f64) -> bool {
        let tag = (channel_id, progress);
        let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
        let mut cells = self.state.cells.lock().expect("mailbox poisoned");
        loop {
            let cell = cells.entry(tag).or_default();
            if !cell.queue.is_empty() {
                return true;
            }
            if cell.complete {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .state
                .available
                .wait_timeout(cells, deadline - now)
                .expect("mailbox poisoned");
            cells = guard;
        }
    }

    /// Takes the next payload for the tag. Must only be called after a
    /// successful `poll`; an empty queue is a contract violation.
    pub fn recv(&self, channel_id: u32, progress: u32) -> BinStream {
        let mut cells = self.state.cells.lock().expect("mailbox poisoned");
        cells
            .get_mut(&(channel_id, progress))
            .and_then(|cell| cell.queue.pop_front())
            .unwrap_or_else(|| {
                panic!(
                    "LocalMailbox::recv called without a successful poll on ({}, {})",
                    channel_id, progress
                )
            })
    }

    /// Hands a payload for `dst_tid` to the event loop. Non-blocking.
    pub fn send(&self, dst_tid: usize, channel_id: u32, progress: u32, payload: BinStream) {
        self.events
            .send(MailboxEvent::OutboundPayload { dst_tid, channel_id, progress, payload })
            .expect("mailbox event loop is gone");
    }

    /// Announces that this worker has finished sending on the tag.
    ///
    /// `senders` and `receivers` are the global worker ids taking part in
    /// the exchange; every sender must call this exactly once per tag with
    /// identical groups.
    pub fn send_complete(&self, channel_id: u32, progress: u32, senders: &[usize], receivers: &[usize]) {
        self.events
            .send(MailboxEvent::OutboundComplete {
                channel_id,
                progress,
                senders: Some(senders.to_vec()),
                receivers: Some(receivers.to_vec()),
            })
            .expect("mailbox event loop is gone");
    }

    /// `send_complete` with every registered worker as both sender and
    /// receiver.
    pub fn send_complete_all(&self, channel_id: u32, progress: u32) {
        self.events
            .send(MailboxEvent::OutboundComplete { channel_id, progress, senders: None, receivers: None })
            .expect("mailbox event loop is gone");
    }
}
