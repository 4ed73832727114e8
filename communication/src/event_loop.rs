//! The per-process event loop and the central receiver.
//!
//! Workers never touch a socket: they post events into the loop through
//! their [`LocalMailbox`](crate::LocalMailbox). The loop routes payloads
//! either into a local mailbox or onto the peer process's TCP stream,
//! gathers per-process `send_complete` announcements, and turns inbound
//! completion frames into per-tag completion marks on every local mailbox.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use lockstep_bytes::BinStream;

use crate::logging::{no_logging, CommEvent, CommLogger, CommLoggerBuilder, CommSetup};
use crate::mailbox::{LocalMailbox, MailboxState, Tag};
use crate::network::{await_peers, connect_to_peer, Frame};
use crate::worker_info::WorkerInfo;

/// Events consumed by the mailbox event loop.
#[derive(Debug)]
pub enum MailboxEvent {
    /// A worker sent a payload to `dst_tid`.
    OutboundPayload {
        /// Destination global worker id.
        dst_tid: usize,
        /// Channel of the payload.
        channel_id: u32,
        /// Progress of the payload.
        progress: u32,
        /// The serialized messages.
        payload: BinStream,
    },
    /// A local worker finished sending on a tag. `None` groups mean "every
    /// registered worker".
    OutboundComplete {
        /// Channel of the completed round.
        channel_id: u32,
        /// Progress of the completed round.
        progress: u32,
        /// Global worker ids that send on this tag.
        senders: Option<Vec<usize>>,
        /// Global worker ids that receive on this tag.
        receivers: Option<Vec<usize>>,
    },
    /// A payload arrived from a peer process.
    InboundPayload {
        /// Destination global worker id.
        dst_tid: usize,
        /// Channel of the payload.
        channel_id: u32,
        /// Progress of the payload.
        progress: u32,
        /// The serialized messages.
        payload: BinStream,
    },
    /// One sender process finished sending on a tag.
    InboundComplete {
        /// Channel of the completed round.
        channel_id: u32,
        /// Progress of the completed round.
        progress: u32,
        /// Total number of distinct sender processes for the tag.
        num_sender_processes: u32,
    },
    /// Stop the loop after draining queued events.
    Shutdown,
}

/// Assembles the communication fabric of one process.
pub struct CommBuilder {
    worker_info: Arc<WorkerInfo>,
    logger_builder: CommLoggerBuilder,
}

impl CommBuilder {
    /// Starts building against a populated cluster directory.
    pub fn new(worker_info: WorkerInfo) -> Self {
        CommBuilder { worker_info: Arc::new(worker_info), logger_builder: no_logging() }
    }

    /// Installs a communication-event logger builder.
    pub fn logging(mut self, builder: CommLoggerBuilder) -> Self {
        self.logger_builder = builder;
        self
    }

    /// Brings up the fabric: accepts one connection per peer on `listener`,
    /// dials every address in `peer_addrs`, and spawns the event loop.
    ///
    /// A single-process cluster passes no listener and no peers and runs
    /// entirely in-process.
    pub fn start(
        self,
        listener: Option<TcpListener>,
        peer_addrs: HashMap<usize, String>,
    ) -> crate::Result<Comm> {
        let info = Arc::clone(&self.worker_info);
        let process_id = info.process_id();

        let (events, inbox) = crossbeam_channel::unbounded();

        let receiver = match listener {
            Some(listener) if !peer_addrs.is_empty() => Some(CentralReceiver::start(
                listener,
                peer_addrs.len(),
                events.clone(),
                process_id,
                Arc::clone(&self.logger_builder),
            )),
            _ => None,
        };

        let mut peers = HashMap::new();
        for (&pid, addr) in &peer_addrs {
            let stream = connect_to_peer(addr, process_id)?;
            peers.insert(pid, BufWriter::with_capacity(1 << 16, stream));
        }

        let mut states = HashMap::new();
        let mut mailboxes = Vec::new();
        for &tid in info.local_tids() {
            let state = Arc::new(MailboxState::default());
            states.insert(tid, Arc::clone(&state));
            mailboxes.push(LocalMailbox::new(tid, state, events.clone(), Arc::clone(&info)));
        }

        let logger_builder = Arc::clone(&self.logger_builder);
        let handle = std::thread::Builder::new()
            .name(format!("lockstep event loop {}", process_id))
            .spawn(move || {
                let logger = logger_builder(CommSetup { process: process_id, sender: true, remote: None });
                let mut state = EventLoopState {
                    worker_info: info,
                    states,
                    peers,
                    send_counts: HashMap::new(),
                    recv_counts: HashMap::new(),
                    logger,
                };
                state.serve(inbox);
            })
            .context("spawning event loop thread")?;

        Ok(Comm {
            mailboxes,
            event_loop: MailboxEventLoop { events, handle: Some(handle) },
            receiver,
        })
    }
}

/// The running communication fabric of one process.
///
/// Field order matters for teardown: the event loop must announce shutdown
/// to its peers before the receiver is dropped.
pub struct Comm {
    /// One mailbox per local worker, in local-id order.
    pub mailboxes: Vec<LocalMailbox>,
    event_loop: MailboxEventLoop,
    #[allow(dead_code)]
    receiver: Option<CentralReceiver>,
}

impl Comm {
    /// A sender handle for injecting events, mostly for tests.
    pub fn event_sender(&self) -> Sender<MailboxEvent> {
        self.event_loop.events.clone()
    }
}

/// Handle to the event loop thread; shuts the loop down when dropped.
pub struct MailboxEventLoop {
    events: Sender<MailboxEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for MailboxEventLoop {
    fn drop(&mut self) {
        let _ = self.events.send(MailboxEvent::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("event loop thread panicked");
        }
    }
}

struct EventLoopState {
    worker_info: Arc<WorkerInfo>,
    states: HashMap<usize, Arc<MailboxState>>,
    peers: HashMap<usize, BufWriter<TcpStream>>,
    send_counts: HashMap<Tag, u32>,
    recv_counts: HashMap<Tag, u32>,
    logger: CommLogger,
}

impl EventLoopState {
    fn serve(&mut self, inbox: Receiver<MailboxEvent>) {
        loop {
            // Block for one event, then drain the burst before flushing
            // peer sockets once.
            let mut shutdown = match inbox.recv() {
                Ok(event) => self.handle(event),
                Err(_) => true,
            };
            while !shutdown {
                match inbox.try_recv() {
                    Ok(event) => shutdown = self.handle(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => shutdown = true,
                }
            }
            self.flush_peers();
            if shutdown {
                self.say_goodbye();
                break;
            }
        }
    }

    fn handle(&mut self, event: MailboxEvent) -> bool {
        match event {
            MailboxEvent::OutboundPayload { dst_tid, channel_id, progress, payload } => {
                self.log_message(true, Some(dst_tid), channel_id, progress, payload.size());
                let pid = self.worker_info.process_of(dst_tid);
                if pid == self.worker_info.process_id() {
                    self.deliver(dst_tid, channel_id, progress, payload);
                } else {
                    self.write_frame(pid, &Frame::Payload { dst_tid, channel_id, progress, payload });
                }
                false
            }
            MailboxEvent::InboundPayload { dst_tid, channel_id, progress, payload } => {
                self.log_message(false, Some(dst_tid), channel_id, progress, payload.size());
                self.deliver(dst_tid, channel_id, progress, payload);
                false
            }
            MailboxEvent::OutboundComplete { channel_id, progress, senders, receivers } => {
                self.outbound_complete(channel_id, progress, senders, receivers);
                false
            }
            MailboxEvent::InboundComplete { channel_id, progress, num_sender_processes } => {
                self.log_message(false, None, channel_id, progress, 0);
                self.inbound_complete(channel_id, progress, num_sender_processes);
                false
            }
            MailboxEvent::Shutdown => true,
        }
    }

    fn deliver(&self, dst_tid: usize, channel_id: u32, progress: u32, payload: BinStream) {
        self.states
            .get(&dst_tid)
            .unwrap_or_else(|| panic!("event loop: no local mailbox for worker {}", dst_tid))
            .deliver((channel_id, progress), payload);
    }

    /// Counts `send_complete` calls of the local sender threads; once all
    /// have reported, notifies every receiver process exactly once.
    fn outbound_complete(
        &mut self,
        channel_id: u32,
        progress: u32,
        senders: Option<Vec<usize>>,
        receivers: Option<Vec<usize>>,
    ) {
        let my_pid = self.worker_info.process_id();
        let num_local_senders = match &senders {
            Some(group) => group.iter().filter(|&&tid| self.worker_info.process_of(tid) == my_pid).count(),
            None => self.worker_info.num_local_workers(),
        };
        assert!(num_local_senders > 0, "send_complete from a worker outside the sender group");

        let tag = (channel_id, progress);
        let count = self.send_counts.entry(tag).or_insert(0);
        *count += 1;
        if (*count as usize) < num_local_senders {
            return;
        }
        self.send_counts.remove(&tag);

        let num_sender_processes = match &senders {
            Some(group) => {
                group.iter().map(|&tid| self.worker_info.process_of(tid)).collect::<BTreeSet<_>>().len()
            }
            None => self.worker_info.num_processes(),
        } as u32;
        let receiver_pids: Vec<usize> = match &receivers {
            Some(group) => group
                .iter()
                .map(|&tid| self.worker_info.process_of(tid))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => self.worker_info.process_ids(),
        };

        for pid in receiver_pids {
            if pid == my_pid {
                self.inbound_complete(channel_id, progress, num_sender_processes);
            } else {
                self.log_message(true, None, channel_id, progress, 0);
                self.write_frame(pid, &Frame::Complete { channel_id, progress, num_sender_processes });
            }
        }
    }

    /// Counts end-of-progress notifications; once every sender process has
    /// reported, the tag completes in every local mailbox.
    fn inbound_complete(&mut self, channel_id: u32, progress: u32, num_sender_processes: u32) {
        let tag = (channel_id, progress);
        let count = self.recv_counts.entry(tag).or_insert(0);
        *count += 1;
        if *count < num_sender_processes {
            return;
        }
        self.recv_counts.remove(&tag);
        for state in self.states.values() {
            state.mark_complete(tag);
        }
    }

    fn write_frame(&mut self, pid: usize, frame: &Frame) {
        let writer = self
            .peers
            .get_mut(&pid)
            .unwrap_or_else(|| panic!("event loop: no connection to process {}", pid));
        frame.write_to(writer).expect("writing to peer process failed");
    }

    fn flush_peers(&mut self) {
        for writer in self.peers.values_mut() {
            writer.flush().expect("flushing peer connection failed");
        }
    }

    fn say_goodbye(&mut self) {
        for writer in self.peers.values_mut() {
            let _ = Frame::Goodbye.write_to(writer);
            let _ = writer.flush();
        }
        self.peers.clear();
    }

    fn log_message(&self, is_send: bool, dst_tid: Option<usize>, channel_id: u32, progress: u32, length: usize) {
        if let Some(logger) = &self.logger {
            logger.log(CommEvent::Message { is_send, dst_tid, channel_id, progress, length });
        }
    }
}

/// Owns the process's listening endpoint.
///
/// An accept thread takes one connection per peer and spawns a reader thread
/// for each. Reader threads forward frames into the event loop and exit on a
/// peer's goodbye frame; they are detached, since a peer says goodbye only
/// during its own shutdown and joining them here would order process
/// teardowns against each other.
pub struct CentralReceiver {
    accept_handle: Option<JoinHandle<()>>,
}

impl CentralReceiver {
    /// Spawns the accept thread for `expected_peers` inbound connections.
    pub fn start(
        listener: TcpListener,
        expected_peers: usize,
        events: Sender<MailboxEvent>,
        process_id: usize,
        logger_builder: CommLoggerBuilder,
    ) -> Self {
        let handle = std::thread::Builder::new()
            .name(format!("lockstep central receiver {}", process_id))
            .spawn(move || {
                let peers = await_peers(&listener, expected_peers)
                    .expect("central receiver failed to accept peers");
                for (peer_id, stream) in peers {
                    let events = events.clone();
                    let logger_builder = Arc::clone(&logger_builder);
                    std::thread::Builder::new()
                        .name(format!("lockstep recv {} <- {}", process_id, peer_id))
                        .spawn(move || {
                            let logger = logger_builder(CommSetup {
                                process: process_id,
                                sender: false,
                                remote: Some(peer_id),
                            });
                            recv_loop(stream, peer_id, events, logger);
                        })
                        .expect("spawning receiver thread failed");
                }
            })
            .expect("spawning accept thread failed");
        CentralReceiver { accept_handle: Some(handle) }
    }
}

impl Drop for CentralReceiver {
    fn drop(&mut self) {
        if let Some(handle) = self.accept_handle.take() {
            handle.join().expect("accept thread panicked");
        }
    }
}

/// Reads frames from one peer until its goodbye; an end of stream without a
/// goodbye is a torn connection and fatal.
fn recv_loop(stream: TcpStream, peer_id: usize, events: Sender<MailboxEvent>, logger: CommLogger) {
    if let Some(logger) = &logger {
        logger.log(CommEvent::State { send: false, remote: Some(peer_id), start: true });
    }
    let mut reader = std::io::BufReader::new(stream);
    loop {
        let frame = match Frame::read_from(&mut reader) {
            Ok(frame) => frame,
            Err(error) => {
                log::error!("receiver for peer {}: {:#}", peer_id, error);
                panic!("lockstep communication error: reading from peer {} failed", peer_id);
            }
        };
        let event = match frame {
            Frame::Payload { dst_tid, channel_id, progress, payload } => {
                MailboxEvent::InboundPayload { dst_tid, channel_id, progress, payload }
            }
            Frame::Complete { channel_id, progress, num_sender_processes } => {
                MailboxEvent::InboundComplete { channel_id, progress, num_sender_processes }
            }
            Frame::Goodbye => break,
        };
        // A closed inbox means our own process is already shutting down.
        if events.send(event).is_err() {
            break;
        }
    }
    if let Some(logger) = &logger {
        logger.log(CommEvent::State { send: false, remote: Some(peer_id), start: false });
        logger.flush();
    }
}
