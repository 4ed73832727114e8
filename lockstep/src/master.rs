//! The control-plane master.
//!
//! Serves worker joins, hands out the authoritative hash ring, tallies exit
//! notifications, and arbitrates entry to and exit from asynchronous phases
//! (granted only once every process has voted). Input-format assignment is
//! handled by separate services and is not part of the core.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Context;
use lockstep_bytes::BinStream;

use crate::config::Config;
use crate::constants::*;
use crate::coordinator::{read_frame, write_frame};
use crate::hash_ring::HashRing;

struct MasterState {
    expected_workers: usize,
    num_processes: usize,
    ring: HashRing,
    serve: bool,
    progress: Mutex<Progress>,
    votes: Condvar,
}

#[derive(Default)]
struct Progress {
    joined: HashSet<usize>,
    exited: HashSet<usize>,
    stop_votes: HashSet<usize>,
    stop_round: u64,
    start_votes: HashSet<usize>,
    start_round: u64,
}

impl MasterState {
    fn finished(&self) -> bool {
        let progress = self.progress.lock().expect("master state poisoned");
        !self.serve && progress.exited.len() == self.expected_workers
    }
}

/// Runs the master until every worker has exited (or forever with the
/// `serve` flag). Binds `master_port` on all interfaces.
pub fn run_master(config: &Config) -> crate::Result<()> {
    let expected_workers = config.machines().len() * config.workers_per_process();
    let state = Arc::new(MasterState {
        expected_workers,
        num_processes: config.machines().len(),
        ring: HashRing::uniform(expected_workers),
        serve: config.serve(),
        progress: Mutex::new(Progress::default()),
        votes: Condvar::new(),
    });

    let listener = TcpListener::bind(("0.0.0.0", config.master_port()))
        .with_context(|| format!("binding master port {}", config.master_port()))?;
    listener.set_nonblocking(true).context("master listener nonblocking")?;
    log::info!("master listening on port {}, expecting {} workers", config.master_port(), expected_workers);

    let mut handlers = Vec::new();
    while !state.finished() {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("master: connection from {}", peer);
                stream.set_nonblocking(false).context("master stream blocking")?;
                let state = Arc::clone(&state);
                handlers.push(std::thread::spawn(move || serve_connection(stream, state)));
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(error) => return Err(error).context("accepting control connection"),
        }
    }

    for handler in handlers {
        let _ = handler.join();
    }
    log::info!("master: all {} workers exited", expected_workers);
    Ok(())
}

fn serve_connection(mut stream: TcpStream, state: Arc<MasterState>) {
    loop {
        let (msg_type, mut body) = match read_frame(&mut stream) {
            Ok(frame) => frame,
            // Processes drop their connection when they are done.
            Err(_) => return,
        };
        let result = match msg_type {
            TYPE_JOIN => {
                let worker_id = body.pop::<u32>() as usize;
                let mut progress = state.progress.lock().expect("master state poisoned");
                progress.joined.insert(worker_id);
                log::debug!("master: worker {} joined ({} total)", worker_id, progress.joined.len());
                drop(progress);
                write_frame(&mut stream, TYPE_JOIN, &BinStream::new())
            }
            TYPE_GET_HASH_RING => {
                let mut reply = BinStream::new();
                reply.push(&state.ring);
                write_frame(&mut stream, TYPE_GET_HASH_RING, &reply)
            }
            TYPE_EXIT => {
                let hostname = body.pop::<String>();
                let worker_id = body.pop::<u32>() as usize;
                let mut progress = state.progress.lock().expect("master state poisoned");
                progress.exited.insert(worker_id);
                log::info!(
                    "master: worker {} on {} exited ({}/{})",
                    worker_id,
                    hostname,
                    progress.exited.len(),
                    state.expected_workers
                );
                Ok(())
            }
            TYPE_STOP_ASYNC_REQ => {
                let process_id = body.pop::<u32>() as usize;
                vote(&state, process_id, true);
                write_frame(&mut stream, TYPE_STOP_ASYNC_YES, &BinStream::new())
            }
            TYPE_START_ASYNC_REQ => {
                let process_id = body.pop::<u32>() as usize;
                vote(&state, process_id, false);
                write_frame(&mut stream, TYPE_START_ASYNC_YES, &BinStream::new())
            }
            TYPE_HEARTBEAT => Ok(()),
            other => {
                log::warn!("master: unknown message type {:#x}", other);
                write_frame(&mut stream, other, &BinStream::new())
            }
        };
        if result.is_err() {
            return;
        }
    }
}

/// Blocks until every process has cast the matching vote, then releases
/// all voters together.
fn vote(state: &MasterState, process_id: usize, stopping: bool) {
    let mut progress = state.progress.lock().expect("master state poisoned");
    let round = if stopping { progress.stop_round } else { progress.start_round };
    {
        let votes = if stopping { &mut progress.stop_votes } else { &mut progress.start_votes };
        votes.insert(process_id);
        if votes.len() == state.num_processes {
            votes.clear();
            if stopping {
                progress.stop_round += 1;
            } else {
                progress.start_round += 1;
            }
            state.votes.notify_all();
            return;
        }
    }
    while round == if stopping { progress.stop_round } else { progress.start_round } {
        progress = state.votes.wait(progress).expect("master state poisoned");
    }
}
