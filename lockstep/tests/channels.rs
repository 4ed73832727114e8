//! Channel semantics across the worker threads of one process.

use std::collections::HashSet;

use lockstep::{
    impl_serialize, list_execute, ChannelHandle, ChannelHooks, Keyed, ObjList, ProcessEnv,
    SumCombiner, WorkerContext,
};

#[derive(Clone, Debug, PartialEq)]
struct Item {
    key: u64,
    payload: u64,
}
impl_serialize!(Item { key, payload });

impl Keyed for Item {
    type Key = u64;
    fn id(&self) -> &u64 {
        &self.key
    }
    fn with_key(key: u64) -> Self {
        Item { key, payload: 0 }
    }
}

#[derive(Clone, Debug)]
struct Word {
    word: String,
}
impl_serialize!(Word { word });

impl Keyed for Word {
    type Key = String;
    fn id(&self) -> &String {
        &self.word
    }
    fn with_key(key: String) -> Self {
        Word { word: key }
    }
}

fn run(workers: usize, job: impl Fn(&mut WorkerContext) + Send + Sync) {
    let env = ProcessEnv::local(workers).expect("local environment");
    lockstep::run_job(env, job).expect("job failed");
}

#[test]
fn push_delivers_to_the_key_owner() {
    run(3, |ctx| {
        let channel = ctx.create_push_channel::<u64, Item>();
        let mut items = ObjList::<Item>::new();
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        channel.borrow_mut().push(&(ctx.global_tid() as u64 + 1), &0u64);
        list_execute(ctx, &mut items, &[], &channels, 1, |_, _| {});

        let owner = ctx.hash_ring().hash_lookup(&0u64);
        let mut received = Vec::new();
        list_execute(ctx, &mut items, &channels, &[], 1, |item, idx| {
            assert_eq!(item.key, 0);
            received.extend_from_slice(channel.borrow().get_at(idx));
        });

        received.sort_unstable();
        if ctx.global_tid() == owner {
            assert_eq!(received, vec![1, 2, 3]);
            assert_eq!(items.get_size(), 1);
        } else {
            assert!(received.is_empty());
            assert_eq!(items.get_size(), 0);
        }
    });
}

#[test]
fn push_keeps_per_key_multisets_apart() {
    run(2, |ctx| {
        let channel = ctx.create_push_channel::<u64, Item>();
        let mut items = ObjList::<Item>::new();
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        // Every worker pushes (key, key * 10 + tid) for keys 0..8.
        for key in 0..8u64 {
            channel.borrow_mut().push(&(key * 10 + ctx.global_tid() as u64), &key);
        }
        list_execute(ctx, &mut items, &[], &channels, 1, |_, _| {});

        list_execute(ctx, &mut items, &channels, &[], 1, |item, idx| {
            let mut messages = channel.borrow().get_at(idx).to_vec();
            messages.sort_unstable();
            assert_eq!(messages, vec![item.key * 10, item.key * 10 + 1]);
        });

        // Each surviving object sits on its ring owner.
        for idx in 0..items.vector_size() {
            assert_eq!(ctx.hash_ring().hash_lookup(&items.get(idx).key), ctx.global_tid());
        }
    });
}

#[test]
fn combined_push_word_count() {
    run(2, |ctx| {
        let channel = ctx.create_push_combined_channel::<u32, SumCombiner<u32>, Word>();
        let mut words = ObjList::<Word>::new();
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        let corpus: &[&str] = if ctx.global_tid() == 0 { &["a", "a", "b"] } else { &["b", "c"] };
        for word in corpus {
            channel.borrow_mut().push(1, &word.to_string());
        }
        list_execute(ctx, &mut words, &[], &channels, 1, |_, _| {});

        let mut seen = Vec::new();
        list_execute(ctx, &mut words, &channels, &[], 1, |word, idx| {
            let count = *channel.borrow().get_at(idx).expect("every object got a message");
            seen.push((word.word.clone(), count));
        });

        for (word, count) in &seen {
            let expected = match word.as_str() {
                "a" | "b" => 2,
                "c" => 1,
                other => panic!("unexpected word {:?}", other),
            };
            assert_eq!(*count, expected, "count of {:?}", word);
            assert_eq!(ctx.hash_ring().hash_lookup(word), ctx.global_tid());
        }
    });
}

#[test]
fn migration_preserves_objects_and_attributes() {
    run(2, |ctx| {
        let channel = ctx.create_migrate_channel::<Item>();
        let mut items = ObjList::<Item>::new();
        let scores = items.create_attrlist::<i32>("score");

        if ctx.global_tid() == 0 {
            for &key in &[100u64, 18, 57] {
                let idx = items.add_object(Item { key, payload: key });
                scores.set(idx, key as i32);
            }
            let idx = items.find_index(&18).expect("object 18 exists");
            channel.borrow_mut().migrate(&mut items, idx, 1);
        }

        channel.borrow_mut().flush();
        channel.borrow_mut().prepare_immigrants(&mut items);
        items.sort();

        if ctx.global_tid() == 0 {
            items.deletion_finalize();
            assert_eq!(items.get_size(), 2);
            assert!(items.find(&18).is_none());
            let idx = items.find_index(&100).unwrap();
            assert_eq!(*scores.get(idx), 100);
        } else {
            assert_eq!(items.get_size(), 1);
            let idx = items.find_index(&18).expect("object 18 arrived");
            assert_eq!(items.get(idx).payload, 18);
            assert_eq!(*scores.get(idx), 18);
        }
    });
}

#[test]
fn globalize_redistributes_by_ring() {
    run(2, |ctx| {
        let mut items = ObjList::<Item>::new();
        if ctx.global_tid() == 0 {
            for key in 0..32u64 {
                items.add_object(Item { key, payload: key });
            }
        }

        lockstep::globalize(ctx, &mut items);

        let keys: HashSet<u64> = (0..items.vector_size()).map(|idx| items.get(idx).key).collect();
        let expected: HashSet<u64> =
            (0..32u64).filter(|key| ctx.hash_ring().hash_lookup(key) == ctx.global_tid()).collect();
        assert_eq!(keys, expected);
        assert_eq!(items.sorted_size(), items.vector_size());
    });
}

#[test]
fn broadcast_publishes_to_every_worker() {
    run(2, |ctx| {
        let channel = ctx.create_broadcast_channel::<u64, i64>();

        let me = ctx.global_tid() as u64;
        channel.borrow_mut().broadcast(&(me * 10), &(me as i64 + 7));
        channel.borrow_mut().out();

        assert_eq!(channel.borrow().get(&0), 7);
        assert_eq!(channel.borrow().get(&10), 8);
        assert!(channel.borrow().try_get(&99).is_none());
        assert!(channel.borrow().contains(&10));

        // Retained entries stay visible next progress without clearing.
        channel.borrow_mut().broadcast(&(me * 10 + 1), &0);
        channel.borrow_mut().out();
        assert!(channel.borrow().contains(&0));
        assert!(channel.borrow().contains(&11));
    });
}

#[test]
fn broadcast_clear_dict_resets_each_progress() {
    run(2, |ctx| {
        let channel = ctx.create_broadcast_channel::<u64, i64>();
        channel.borrow_mut().set_clear_dict(true);

        let me = ctx.global_tid() as u64;
        channel.borrow_mut().broadcast(&me, &1);
        channel.borrow_mut().out();
        assert!(channel.borrow().contains(&0));
        assert!(channel.borrow().contains(&1));

        channel.borrow_mut().broadcast(&(me + 100), &2);
        channel.borrow_mut().out();
        assert!(!channel.borrow().contains(&0));
        assert!(channel.borrow().contains(&100));
        assert!(channel.borrow().contains(&101));
    });
}

#[test]
fn async_push_drains_without_a_barrier() {
    run(2, |ctx| {
        let channel = ctx.create_async_push_channel::<u64, Item>();
        let mut items = ObjList::<Item>::new();

        for key in 0..10u64 {
            channel.borrow_mut().push(&(ctx.global_tid() as u64), &key);
        }
        channel.borrow_mut().flush();
        channel.borrow_mut().drain_with_timeout(&mut items, 0.5);

        // Every owned key arrived with one message per sender.
        for key in 0..10u64 {
            if ctx.hash_ring().hash_lookup(&key) != ctx.global_tid() {
                continue;
            }
            let idx = items.find_index(&key).expect("owned key arrived");
            let mut messages = channel.borrow().get_at(idx).to_vec();
            messages.sort_unstable();
            assert_eq!(messages, vec![0, 1]);
        }
    });
}

#[test]
fn async_migrate_moves_objects_without_a_barrier() {
    run(2, |ctx| {
        let channel = ctx.create_async_migrate_channel::<Item>();
        let mut items = ObjList::<Item>::new();

        if ctx.global_tid() == 0 {
            for key in 0..6u64 {
                items.add_object(Item { key, payload: key * 2 });
            }
            for key in 0..6u64 {
                let idx = items.find_index(&key).unwrap();
                channel.borrow_mut().migrate(&mut items, idx, 1);
            }
            items.deletion_finalize();
            assert_eq!(items.get_size(), 0);
        }
        channel.borrow_mut().flush();

        if ctx.global_tid() == 1 {
            while items.get_size() < 6 {
                channel.borrow_mut().drain_with_timeout(&mut items, 0.2);
            }
            items.sort();
            for key in 0..6u64 {
                let idx = items.find_index(&key).expect("migrated object arrived");
                assert_eq!(items.get(idx).payload, key * 2);
            }
        }
    });
}

#[test]
fn registered_channels_drive_list_execute() {
    run(2, |ctx| {
        let channel = ctx.create_push_channel::<u64, Item>();
        let channel_id = channel.borrow().base().channel_id();
        let mut items = ObjList::<Item>::new();
        items.attach_inchannel(channel_id);
        items.attach_outchannel(channel_id);

        channel.borrow_mut().push(&5, &3u64);
        lockstep::list_execute_registered(ctx, &mut items, 1, |_, _| {});

        let mut delivered = 0;
        lockstep::list_execute_registered(ctx, &mut items, 1, |item, idx| {
            assert_eq!(item.key, 3);
            delivered += channel.borrow().get_at(idx).len();
        });
        if ctx.hash_ring().hash_lookup(&3u64) == ctx.global_tid() {
            assert_eq!(delivered, 2);
        } else {
            assert_eq!(delivered, 0);
        }

        items.detach_inchannel(channel_id);
        items.detach_outchannel(channel_id);
        ctx.drop_channel(channel_id);
        assert!(ctx.channel(channel_id).is_none());
    });
}
