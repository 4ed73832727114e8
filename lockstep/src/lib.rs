//! A distributed, in-memory bulk-synchronous object-and-channel engine.
//!
//! Worker threads across many processes collectively iterate over
//! partitioned [`ObjList`]s of keyed user objects and exchange messages
//! through typed channels. A computation is a sequence of supersteps: each
//! [`list_execute`] drains the inbound channels, applies the user function
//! to every live object, and flushes the outbound channels, whose
//! cluster-wide completion protocol separates one superstep's traffic from
//! the next.
//!
//! # Example
//! ```
//! use lockstep::{list_execute, Keyed, ObjList, ProcessEnv, SumCombiner};
//!
//! struct Word(String);
//! impl Keyed for Word {
//!     type Key = String;
//!     fn id(&self) -> &String { &self.0 }
//!     fn with_key(key: String) -> Self { Word(key) }
//! }
//!
//! let env = ProcessEnv::local(2).unwrap();
//! lockstep::run_job(env, |ctx| {
//!     let channel = ctx.create_push_combined_channel::<u32, SumCombiner<u32>, Word>();
//!     let mut words = ObjList::<Word>::new();
//!
//!     let corpus: &[&str] = if ctx.global_tid() == 0 { &["a", "a", "b"] } else { &["b"] };
//!     for word in corpus {
//!         channel.borrow_mut().push(1, &word.to_string());
//!     }
//!
//!     let counting: [lockstep::ChannelHandle; 1] = [channel.clone()];
//!     list_execute(ctx, &mut words, &[], &counting, 1, |_, _| {});
//!     list_execute(ctx, &mut words, &counting, &[], 1, |word, idx| {
//!         let count = *channel.borrow().get_at(idx).unwrap();
//!         if word.0 == "b" { assert_eq!(count, 2); }
//!     });
//! }).unwrap();
//! ```

pub mod accessor;
pub mod aggregator;
pub mod barrier;
pub mod channel;
pub mod combiner;
pub mod config;
pub mod constants;
pub mod context;
pub mod coordinator;
pub mod executor;
pub mod hash_ring;
pub mod master;
pub mod objlist;
pub mod shuffle;

mod attrlist;

/// Result type used by all fallible runtime paths.
pub type Result<T> = anyhow::Result<T>;

pub use accessor::Accessor;
pub use aggregator::{Aggregator, AggregatorFactory};
pub use attrlist::AttrList;
pub use barrier::KBarrier;
pub use channel::{
    AsyncMigrateChannel, AsyncPushChannel, BroadcastChannel, ChannelHandle, ChannelHooks,
    ChannelManager, MigrateChannel, PushChannel, PushCombinedChannel,
};
pub use combiner::{Combiner, IdenCombiner, MaxCombiner, MinCombiner, SumCombiner};
pub use config::Config;
pub use context::{run_job, ProcessEnv, WorkerContext};
pub use executor::{globalize, list_execute, list_execute_registered};
pub use hash_ring::HashRing;
pub use master::run_master;
pub use objlist::{Keyed, ObjList};

pub use lockstep_bytes::{impl_serialize, BinStream, Serialize};
pub use lockstep_communication::LocalMailbox;
