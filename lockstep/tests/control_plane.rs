//! Master/worker control-plane handshakes.

use std::time::Duration;

use lockstep::constants::{TYPE_START_ASYNC_REQ, TYPE_START_ASYNC_YES, TYPE_STOP_ASYNC_REQ, TYPE_STOP_ASYNC_YES};
use lockstep::{BinStream, Config, ProcessEnv};

fn config_with_master(port: u16, workers: usize) -> Config {
    let args = [
        "--hostname".to_string(),
        "localhost".to_string(),
        "--master_host".to_string(),
        "localhost".to_string(),
        "--master_port".to_string(),
        port.to_string(),
        "-w".to_string(),
        workers.to_string(),
    ];
    Config::from_args(args.into_iter()).expect("config parses")
}

#[test]
fn join_ring_async_votes_and_exit() {
    let port = 24917;
    let workers = 2;

    let master_config = config_with_master(port, workers);
    let master = std::thread::spawn(move || lockstep::run_master(&master_config));

    // The master needs a moment to bind; retry setup until it answers.
    let env = loop {
        match ProcessEnv::setup(config_with_master(port, workers)) {
            Ok(env) => break env,
            Err(_) => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    // The authoritative ring covers every expected worker.
    assert_eq!(env.worker_info().num_workers(), workers);

    lockstep::run_job(env, |ctx| {
        assert_eq!(ctx.hash_ring().num_workers(), workers);

        // One vote per process; a single-process cluster is granted
        // immediately.
        if ctx.local_tid() == 0 {
            let coordinator = ctx.coordinator().expect("master configured").clone();
            let mut vote = BinStream::new();
            vote.push(&0u32);
            let (reply, _) = coordinator.ask_master(&vote, TYPE_START_ASYNC_REQ).unwrap();
            assert_eq!(reply, TYPE_START_ASYNC_YES);

            let mut vote = BinStream::new();
            vote.push(&0u32);
            let (reply, _) = coordinator.ask_master(&vote, TYPE_STOP_ASYNC_REQ).unwrap();
            assert_eq!(reply, TYPE_STOP_ASYNC_YES);
        }
    })
    .expect("job failed");

    // Every worker notified its exit, so the master returns.
    master.join().expect("master thread").expect("master failed");
}
