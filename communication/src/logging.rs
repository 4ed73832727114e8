//! Event types logged by the communication threads.

use std::sync::Arc;

pub use lockstep_logging::Logger;

/// Identifies one communication thread within the cluster.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommSetup {
    /// This process's id.
    pub process: usize,
    /// True for the sending side, false for the receiving side.
    pub sender: bool,
    /// The remote process, when the thread serves a specific peer.
    pub remote: Option<usize>,
}

/// Events of the communication layer.
#[derive(Clone, Debug)]
pub enum CommEvent {
    /// A frame crossed the wire.
    Message {
        /// True on the sending side.
        is_send: bool,
        /// Destination worker of the frame, when it carried one.
        dst_tid: Option<usize>,
        /// Channel the frame belongs to.
        channel_id: u32,
        /// Progress the frame belongs to.
        progress: u32,
        /// Payload length in bytes, zero for completions.
        length: usize,
    },
    /// A communication thread started or stopped.
    State {
        /// True on the sending side.
        send: bool,
        /// Remote process served by the thread.
        remote: Option<usize>,
        /// True at thread start, false at exit.
        start: bool,
    },
}

/// A per-thread communication logger, if logging is enabled.
pub type CommLogger = Option<Logger<CommEvent>>;

/// Builds a logger for a communication thread from its identity; comm threads
/// construct their logger locally since loggers are not `Send`.
pub type CommLoggerBuilder = Arc<dyn Fn(CommSetup) -> CommLogger + Send + Sync>;

/// A builder that logs nothing.
pub fn no_logging() -> CommLoggerBuilder {
    Arc::new(|_| None)
}
