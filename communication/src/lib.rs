//! The communication substrate of lockstep: per-thread mailboxes multiplexed
//! over one TCP endpoint per process.
//!
//! Workers interact only with their [`LocalMailbox`]: `send` hands a
//! [`BinStream`](lockstep_bytes::BinStream) to the process's event loop,
//! `send_complete` announces that a round of outgoing communication for a
//! `(channel, progress)` tag is finished, and `poll`/`recv` drain inbound
//! traffic until the cluster-wide completion for that tag has been observed.
//!
//! One [`MailboxEventLoop`] thread per process routes outbound traffic either
//! back into a local mailbox or onto the peer's TCP socket; one
//! [`CentralReceiver`] per process accepts a connection from every peer and
//! feeds inbound frames back into the event loop.

pub mod event_loop;
pub mod logging;
pub mod mailbox;
pub mod network;
pub mod worker_info;

/// Result type used by all fallible communication paths.
pub type Result<T> = anyhow::Result<T>;

pub use event_loop::{CentralReceiver, CommBuilder, MailboxEvent, MailboxEventLoop};
pub use mailbox::LocalMailbox;
pub use network::Frame;
pub use worker_info::WorkerInfo;

/// Wire tag of a payload frame.
pub const MAILBOX_EVENT_RECV_COMM: u32 = 0x2f3b_1a66;
/// Wire tag of an end-of-progress frame.
pub const MAILBOX_EVENT_RECV_COMM_END: u32 = 0x30e3_1266;
/// Wire tag marking clean shutdown of a peer's outbound stream.
pub const MAILBOX_EVENT_DESTROY: u32 = 0x303b_1276;
