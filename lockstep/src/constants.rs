//! Protocol constants. The numeric values are wire-visible and must not
//! change between releases.

/// Worker announces its presence; body: `u32` worker id.
pub const TYPE_JOIN: u32 = 0x47d6_9ed5;
/// Worker announces completion; body: hostname string, `u32` worker id.
pub const TYPE_EXIT: u32 = 0x47d7_9fd5;
/// Worker asks for the authoritative hash ring; reply body: serialized ring.
pub const TYPE_GET_HASH_RING: u32 = 0x48d6_93d5;
/// Process votes to leave an asynchronous phase.
pub const TYPE_STOP_ASYNC_REQ: u32 = 0xf89d_74b4;
/// Granted once every process has voted to stop.
pub const TYPE_STOP_ASYNC_YES: u32 = 0x09b8_ab2b;
/// Not yet granted.
pub const TYPE_STOP_ASYNC_NO: u32 = 0x192a_241a;
/// Process votes to enter an asynchronous phase.
pub const TYPE_START_ASYNC_REQ: u32 = 0x3022_33da;
/// Granted once every process has voted to start.
pub const TYPE_START_ASYNC_YES: u32 = 0x47d6_7f00;
/// Not yet granted.
pub const TYPE_START_ASYNC_NO: u32 = 0x5c22_9448;
/// Liveness ping; no reply.
pub const TYPE_HEARTBEAT: u32 = 0xcf99_ed5e;

/// Channel id reserved for the aggregator synchronization channel; user
/// channels count up from zero and never reach it.
pub const AGGREGATOR_CHANNEL_ID: u32 = 0xffff_a99e;
