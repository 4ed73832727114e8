//! Common state and the dispatch surface shared by every channel kind.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use lockstep_bytes::BinStream;
use lockstep_communication::{LocalMailbox, WorkerInfo};

use crate::hash_ring::HashRing;

/// Per-worker resources a channel captures at construction.
#[derive(Clone)]
pub struct ChannelResources {
    /// Local id of the owning worker.
    pub local_id: usize,
    /// Global id of the owning worker.
    pub global_id: usize,
    /// The owning worker's mailbox.
    pub mailbox: Rc<LocalMailbox>,
    /// Cluster directory.
    pub worker_info: Arc<WorkerInfo>,
    /// The ring mapping keys to workers.
    pub hash_ring: HashRing,
}

/// State common to all channels: identity, progress counter, and the flush
/// bitmap consulted by `list_execute`.
pub struct ChannelBase {
    channel_id: u32,
    local_id: usize,
    global_id: usize,
    progress: u32,
    flushed: Vec<bool>,
    sync: bool,
    mailbox: Rc<LocalMailbox>,
    worker_info: Arc<WorkerInfo>,
    hash_ring: HashRing,
}

impl ChannelBase {
    pub(crate) fn new(channel_id: u32, res: &ChannelResources) -> Self {
        ChannelBase {
            channel_id,
            local_id: res.local_id,
            global_id: res.global_id,
            progress: 0,
            flushed: vec![false],
            sync: true,
            mailbox: Rc::clone(&res.mailbox),
            worker_info: Arc::clone(&res.worker_info),
            hash_ring: res.hash_ring.clone(),
        }
    }

    /// The process-unique channel id.
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Current progress; bumped by each flush.
    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Local id of the owning worker.
    pub fn local_id(&self) -> usize {
        self.local_id
    }

    /// Global id of the owning worker.
    pub fn global_id(&self) -> usize {
        self.global_id
    }

    /// Whether the channel synchronizes at superstep boundaries.
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn set_async(&mut self) {
        self.sync = false;
    }

    /// Whether the current progress has been flushed and awaits inbound
    /// dispatch.
    pub fn is_flushed(&self) -> bool {
        self.flushed[self.progress as usize]
    }

    /// Clears the current progress's flush bit once inbound dispatch is
    /// done.
    pub fn reset_flushed(&mut self) {
        let progress = self.progress as usize;
        self.flushed[progress] = false;
    }

    /// Advances progress; the new progress is born flushed.
    pub fn inc_progress(&mut self) {
        self.progress += 1;
        self.flushed.resize(self.progress as usize + 1, true);
    }

    pub(crate) fn mailbox(&self) -> &LocalMailbox {
        &self.mailbox
    }

    pub(crate) fn worker_info(&self) -> &WorkerInfo {
        &self.worker_info
    }

    pub(crate) fn hash_ring(&self) -> &HashRing {
        &self.hash_ring
    }
}

/// The hooks `list_execute` drives on every channel, type-erased so one
/// manager can hold heterogeneous channels.
///
/// The destination list is passed as `&mut dyn Any`; each concrete channel
/// downcasts it back to its own `ObjList` type, and a mismatch is a wiring
/// bug and panics.
pub trait ChannelHooks {
    /// Shared channel state.
    fn base(&self) -> &ChannelBase;
    /// Shared channel state, mutably.
    fn base_mut(&mut self) -> &mut ChannelBase;

    /// Called before inbound dispatch of the current progress; typically
    /// clears receive buffers.
    fn prepare(&mut self, _dst: &mut dyn Any) {}

    /// Handles one delivered stream for the current progress.
    fn process_in(&mut self, _dst: &mut dyn Any, _bin: BinStream) {}

    /// Flushes outbound buffers at the end of a superstep.
    fn flush_out(&mut self) {}
}

/// A shared, type-erased channel handle.
pub type ChannelHandle = Rc<RefCell<dyn ChannelHooks>>;
