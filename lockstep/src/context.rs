//! Process and worker runtime contexts.
//!
//! A [`ProcessEnv`] owns everything with process lifetime: configuration,
//! the cluster directory, the communication fabric, the process-shared
//! stores, and the optional master connection. [`run_job`] spawns the
//! worker threads, hands each a [`WorkerContext`], and joins them; the
//! per-worker context replaces the original thread-local singletons with an
//! explicit object carrying the mailbox, the hash ring, the channel store,
//! and the aggregator factory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use lockstep_bytes::{BinStream, Serialize};
use lockstep_communication::event_loop::Comm;
use lockstep_communication::logging::{CommEvent, CommSetup};
use lockstep_communication::{CommBuilder, LocalMailbox, WorkerInfo};
use lockstep_logging::Logger;

use crate::accessor::AccessorStore;
use crate::aggregator::{AggregatorFactory, AggregatorShared};
use crate::barrier::KBarrier;
use crate::channel::{
    AggregatorChannel, AsyncMigrateChannel, AsyncPushChannel, BroadcastChannel, ChannelHandle,
    ChannelResources, ChannelStore, MigrateChannel, PushChannel, PushCombinedChannel,
};
use crate::combiner::Combiner;
use crate::config::Config;
use crate::constants::{TYPE_EXIT, TYPE_GET_HASH_RING, TYPE_JOIN};
use crate::coordinator::Coordinator;
use crate::hash_ring::HashRing;
use crate::objlist::Keyed;
use crate::shuffle::ShuffleCombinerStore;

/// Stores shared by every worker of one process.
pub struct ProcessGlobals {
    /// Shuffle sets of the combined push channels.
    pub shuffle: ShuffleCombinerStore,
    /// Hosted dictionaries of the broadcast channels.
    pub accessors: AccessorStore,
    /// Aggregator slots, synced values, and barrier.
    pub aggregators: Arc<AggregatorShared>,
    /// General-purpose local barrier.
    pub barrier: KBarrier,
}

impl ProcessGlobals {
    fn new() -> Self {
        ProcessGlobals {
            shuffle: ShuffleCombinerStore::new(),
            accessors: AccessorStore::new(),
            aggregators: Arc::new(AggregatorShared::new()),
            barrier: KBarrier::new(),
        }
    }
}

/// Everything with process lifetime, torn down in field order: the
/// communication fabric goes last, after the workers are gone.
pub struct ProcessEnv {
    config: Config,
    worker_info: WorkerInfo,
    hash_ring: HashRing,
    globals: Arc<ProcessGlobals>,
    coordinator: Option<Arc<Coordinator>>,
    comm: Comm,
}

impl ProcessEnv {
    /// Brings up the process: joins the master (when configured), fetches
    /// the authoritative hash ring, and starts the communication fabric.
    pub fn setup(config: Config) -> crate::Result<ProcessEnv> {
        let worker_info = config.worker_info().map_err(|e| anyhow!(e))?;
        let process_id = worker_info.process_id();

        let coordinator = match config.master_host() {
            Some(host) => Some(Arc::new(Coordinator::connect(host, config.master_port())?)),
            None => None,
        };

        let hash_ring = match &coordinator {
            Some(coordinator) => {
                for &tid in worker_info.local_tids() {
                    let mut join = BinStream::new();
                    join.push(&(tid as u32));
                    coordinator.ask_master(&join, TYPE_JOIN).context("joining the master")?;
                }
                let (_, mut reply) = coordinator
                    .ask_master(&BinStream::new(), TYPE_GET_HASH_RING)
                    .context("fetching the hash ring")?;
                reply.pop::<HashRing>()
            }
            None => HashRing::uniform(worker_info.num_workers()),
        };

        let (listener, peers) = if worker_info.num_processes() > 1 {
            let listener = TcpListener::bind(("0.0.0.0", config.comm_port()))
                .with_context(|| format!("binding comm port {}", config.comm_port()))?;
            let peers: HashMap<usize, String> = (0..worker_info.num_processes())
                .filter(|&pid| pid != process_id)
                .map(|pid| (pid, config.comm_addr_of(pid)))
                .collect();
            (Some(listener), peers)
        } else {
            (None, HashMap::new())
        };

        let mut builder = CommBuilder::new(worker_info.clone());
        // The `comm_log` parameter routes communication events through the
        // operational log; each comm thread gets its own buffering logger.
        if config.param("comm_log").is_some() {
            builder = builder.logging(Arc::new(|setup: CommSetup| {
                Some(Logger::new(
                    std::time::Instant::now(),
                    Box::new(move |_, batch: &[(std::time::Duration, CommEvent)]| {
                        for (elapsed, event) in batch {
                            log::debug!("comm {:?} at {:?}: {:?}", setup, elapsed, event);
                        }
                    }),
                ))
            }));
        }
        let comm = builder.start(listener, peers)?;
        log::info!(
            "process {} up: {} workers, {} processes",
            process_id,
            worker_info.num_local_workers(),
            worker_info.num_processes()
        );

        Ok(ProcessEnv {
            config,
            worker_info,
            hash_ring,
            globals: Arc::new(ProcessGlobals::new()),
            coordinator,
            comm,
        })
    }

    /// A single-process environment with `workers` threads, no master, and
    /// no networking.
    pub fn local(workers: usize) -> crate::Result<ProcessEnv> {
        ProcessEnv::setup(Config::local(workers))
    }

    /// The cluster directory.
    pub fn worker_info(&self) -> &WorkerInfo {
        &self.worker_info
    }

    /// The startup configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Runs `job` on every local worker thread and joins them. A panicking
/// worker fails the whole job.
pub fn run_job<F>(mut env: ProcessEnv, job: F) -> crate::Result<()>
where
    F: Fn(&mut WorkerContext) + Send + Sync,
{
    let mailboxes = std::mem::take(&mut env.comm.mailboxes);
    let worker_info = Arc::new(env.worker_info.clone());
    let process_id = worker_info.process_id();

    let outcome: Vec<std::thread::Result<()>> = std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (local_tid, mailbox) in mailboxes.into_iter().enumerate() {
            let job = &job;
            let worker_info = Arc::clone(&worker_info);
            let hash_ring = env.hash_ring.clone();
            let globals = Arc::clone(&env.globals);
            let coordinator = env.coordinator.clone();
            let hostname = env.config.hostname().to_owned();
            let global_tid = worker_info.local_to_global(process_id, local_tid);

            let handle = std::thread::Builder::new()
                .name(format!("lockstep worker {}", global_tid))
                .spawn_scoped(scope, move || {
                    let mut ctx = WorkerContext::new(
                        global_tid,
                        local_tid,
                        mailbox,
                        worker_info,
                        hash_ring,
                        globals,
                        coordinator.clone(),
                    );
                    job(&mut ctx);

                    if let Some(coordinator) = &coordinator {
                        let mut done = BinStream::new();
                        done.push(&hostname);
                        done.push(&(global_tid as u32));
                        let _ = coordinator.notify_master(&done, TYPE_EXIT);
                    }
                })
                .expect("spawning worker thread failed");
            handles.push(handle);
        }
        handles.into_iter().map(|handle| handle.join()).collect()
    });

    let failures = outcome.iter().filter(|result| result.is_err()).count();
    if failures > 0 {
        return Err(anyhow!("{} worker thread(s) panicked", failures));
    }
    Ok(())
}

/// Per-worker execution context.
pub struct WorkerContext {
    global_tid: usize,
    local_tid: usize,
    mailbox: Rc<LocalMailbox>,
    worker_info: Arc<WorkerInfo>,
    hash_ring: HashRing,
    globals: Arc<ProcessGlobals>,
    coordinator: Option<Arc<Coordinator>>,
    channels: ChannelStore,
    aggregators: AggregatorFactory,
}

impl WorkerContext {
    fn new(
        global_tid: usize,
        local_tid: usize,
        mailbox: LocalMailbox,
        worker_info: Arc<WorkerInfo>,
        hash_ring: HashRing,
        globals: Arc<ProcessGlobals>,
        coordinator: Option<Arc<Coordinator>>,
    ) -> Self {
        let mailbox = Rc::new(mailbox);
        let aggregators = AggregatorFactory::new(
            local_tid,
            Arc::clone(&worker_info),
            Arc::clone(&globals.aggregators),
            AggregatorChannel::new(Rc::clone(&mailbox), Arc::clone(&worker_info)),
        );
        WorkerContext {
            global_tid,
            local_tid,
            mailbox,
            worker_info,
            hash_ring,
            globals,
            coordinator,
            channels: ChannelStore::new(),
            aggregators,
        }
    }

    /// Global id of this worker.
    pub fn global_tid(&self) -> usize {
        self.global_tid
    }

    /// Local id of this worker within its process.
    pub fn local_tid(&self) -> usize {
        self.local_tid
    }

    /// Total workers in the cluster.
    pub fn num_workers(&self) -> usize {
        self.worker_info.num_workers()
    }

    /// Worker threads in this process.
    pub fn num_local_workers(&self) -> usize {
        self.worker_info.num_local_workers()
    }

    /// Processes in the cluster.
    pub fn num_processes(&self) -> usize {
        self.worker_info.num_processes()
    }

    /// This worker's mailbox.
    pub fn mailbox(&self) -> &LocalMailbox {
        &self.mailbox
    }

    /// The cluster directory.
    pub fn worker_info(&self) -> &Arc<WorkerInfo> {
        &self.worker_info
    }

    /// The ring mapping keys to workers.
    pub fn hash_ring(&self) -> &HashRing {
        &self.hash_ring
    }

    /// The master connection, when one is configured.
    pub fn coordinator(&self) -> Option<&Arc<Coordinator>> {
        self.coordinator.as_ref()
    }

    /// Process-shared stores.
    pub fn globals(&self) -> &Arc<ProcessGlobals> {
        &self.globals
    }

    /// The aggregator factory of this worker.
    pub fn aggregator_factory(&mut self) -> &mut AggregatorFactory {
        &mut self.aggregators
    }

    /// Barrier across the local workers of this process.
    pub fn local_barrier(&self) {
        self.globals.barrier.wait(self.num_local_workers());
    }

    fn channel_resources(&self) -> ChannelResources {
        ChannelResources {
            local_id: self.local_tid,
            global_id: self.global_tid,
            mailbox: Rc::clone(&self.mailbox),
            worker_info: Arc::clone(&self.worker_info),
            hash_ring: self.hash_ring.clone(),
        }
    }

    /// Creates a push channel. Workers must create channels in the same
    /// order so ids agree across the cluster.
    pub fn create_push_channel<M, T>(&mut self) -> Rc<RefCell<PushChannel<M, T>>>
    where
        M: lockstep_bytes::Serialize + 'static,
        T: Keyed,
    {
        let id = self.channels.next_channel_id();
        let channel = Rc::new(RefCell::new(PushChannel::new(id, &self.channel_resources())));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Creates a combined push channel over combiner `C`.
    pub fn create_push_combined_channel<M, C, T>(
        &mut self,
    ) -> Rc<RefCell<PushCombinedChannel<M, T, C>>>
    where
        M: lockstep_bytes::Serialize + PartialEq + Send + 'static,
        T: Keyed,
        T::Key: Send,
        C: Combiner<M>,
    {
        let id = self.channels.next_channel_id();
        let shuffle = self.globals.shuffle.get_or_create::<T::Key, M>(
            id,
            self.num_local_workers(),
            self.worker_info.largest_tid() + 1,
        );
        let channel =
            Rc::new(RefCell::new(PushCombinedChannel::new(id, &self.channel_resources(), shuffle)));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Creates a migrate channel.
    pub fn create_migrate_channel<T>(&mut self) -> Rc<RefCell<MigrateChannel<T>>>
    where
        T: Keyed + Serialize,
    {
        let id = self.channels.next_channel_id();
        let channel = Rc::new(RefCell::new(MigrateChannel::new(id, &self.channel_resources())));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Creates a broadcast channel.
    pub fn create_broadcast_channel<K, V>(&mut self) -> Rc<RefCell<BroadcastChannel<K, V>>>
    where
        K: Clone + Eq + std::hash::Hash + Serialize + Send + 'static,
        V: Clone + Serialize + Send + 'static,
    {
        let id = self.channels.next_channel_id();
        let accessors = self.globals.accessors.get_or_create::<HashMap<K, V>>(
            id,
            self.num_local_workers(),
            self.num_local_workers(),
        );
        let channel =
            Rc::new(RefCell::new(BroadcastChannel::new(id, &self.channel_resources(), accessors)));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Creates an asynchronous push channel.
    pub fn create_async_push_channel<M, T>(&mut self) -> Rc<RefCell<AsyncPushChannel<M, T>>>
    where
        M: lockstep_bytes::Serialize + 'static,
        T: Keyed,
    {
        let id = self.channels.next_channel_id();
        let channel = Rc::new(RefCell::new(AsyncPushChannel::new(id, &self.channel_resources())));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Creates an asynchronous migrate channel.
    pub fn create_async_migrate_channel<T>(&mut self) -> Rc<RefCell<AsyncMigrateChannel<T>>>
    where
        T: Keyed + Serialize,
    {
        let id = self.channels.next_channel_id();
        let channel =
            Rc::new(RefCell::new(AsyncMigrateChannel::new(id, &self.channel_resources())));
        let handle: ChannelHandle = channel.clone();
        self.channels.insert(id, handle);
        channel
    }

    /// Resolves a channel id through this worker's store.
    pub fn channel(&self, channel_id: u32) -> Option<ChannelHandle> {
        self.channels.get(channel_id)
    }

    /// Detaches a channel from the store and releases its process-shared
    /// state. Callers also detach the id from any lists it was attached to.
    pub fn drop_channel(&mut self, channel_id: u32) {
        if self.channels.remove(channel_id).is_some() {
            self.globals.shuffle.release(channel_id);
            self.globals.accessors.release(channel_id);
        }
    }
}
