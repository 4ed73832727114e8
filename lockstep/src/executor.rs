//! Superstep execution over an object list.

use lockstep_bytes::Serialize;

use crate::channel::{ChannelHandle, ChannelHooks, ChannelManager};
use crate::context::WorkerContext;
use crate::objlist::{Keyed, ObjList};

/// Runs `num_iters` supersteps over `list`.
///
/// Each iteration first drains the mailbox into every flushed in-channel,
/// then applies `f` to every live object (the index is passed so user code
/// can address per-object channel and attribute state), then flushes every
/// out-channel, which advances its progress and announces completion.
pub fn list_execute<T, F>(
    ctx: &WorkerContext,
    list: &mut ObjList<T>,
    in_channels: &[ChannelHandle],
    out_channels: &[ChannelHandle],
    num_iters: usize,
    mut f: F,
) where
    T: Keyed,
    F: FnMut(&mut T, usize),
{
    for iter in 0..num_iters {
        ChannelManager::new(in_channels).poll_and_distribute(ctx.mailbox(), list);

        for idx in 0..list.vector_size() {
            if list.get_del(idx) {
                continue;
            }
            f(list.get_mut(idx), idx);
        }

        ChannelManager::new(out_channels).flush();

        if ctx.global_tid() == 0 && num_iters > 1 {
            log::info!("iter [{}/{}] finished", iter + 1, num_iters);
        }
    }
}

/// [`list_execute`] over the channels attached to the list itself.
pub fn list_execute_registered<T, F>(
    ctx: &WorkerContext,
    list: &mut ObjList<T>,
    num_iters: usize,
    f: F,
) where
    T: Keyed,
    F: FnMut(&mut T, usize),
{
    let resolve = |ids: &[u32]| -> Vec<ChannelHandle> {
        ids.iter()
            .map(|&id| {
                ctx.channel(id)
                    .unwrap_or_else(|| panic!("list_execute: channel {} not in this worker's store", id))
            })
            .collect()
    };
    let in_channels = resolve(list.in_channel_ids());
    let out_channels = resolve(list.out_channel_ids());
    list_execute(ctx, list, &in_channels, &out_channels, num_iters, f);
}

/// Redistributes every object to its ring owner through a temporary migrate
/// channel, then sorts the list. All workers must call this together.
pub fn globalize<T>(ctx: &mut WorkerContext, list: &mut ObjList<T>)
where
    T: Keyed + Serialize,
{
    let channel = ctx.create_migrate_channel::<T>();
    let channel_id = channel.borrow().base().channel_id();

    {
        let mut channel = channel.borrow_mut();
        for idx in 0..list.vector_size() {
            if list.get_del(idx) {
                continue;
            }
            let owner = ctx.hash_ring().hash_lookup(list.get(idx).id());
            if owner != ctx.global_tid() {
                channel.migrate(list, idx, owner);
            }
        }
        list.deletion_finalize();
        channel.flush();
        channel.prepare_immigrants(list);
    }
    list.sort();

    ctx.drop_channel(channel_id);
}
