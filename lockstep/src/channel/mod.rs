//! Typed per-superstep data exchange between object lists.
//!
//! Four channel kinds (push, combined push, migrate, broadcast) plus the
//! async push/migrate variants share a common base and an object-safe hook
//! surface, so `list_execute` and the [`ChannelManager`] can drive a
//! heterogeneous set by channel id.

pub mod aggregator;
pub mod async_migrate;
pub mod async_push;
pub mod base;
pub mod broadcast;
pub mod manager;
pub mod migrate;
pub mod push;
pub mod push_combined;
pub mod store;

pub use aggregator::AggregatorChannel;
pub use async_migrate::AsyncMigrateChannel;
pub use async_push::AsyncPushChannel;
pub use base::{ChannelBase, ChannelHandle, ChannelHooks, ChannelResources};
pub use broadcast::BroadcastChannel;
pub use manager::ChannelManager;
pub use migrate::MigrateChannel;
pub use push::PushChannel;
pub use push_combined::PushCombinedChannel;
pub use store::ChannelStore;
