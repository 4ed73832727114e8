//! Aggregator synchronization across worker threads.

use lockstep::{ProcessEnv, WorkerContext};

fn run(workers: usize, job: impl Fn(&mut WorkerContext) + Send + Sync) {
    let env = ProcessEnv::local(workers).expect("local environment");
    lockstep::run_job(env, job).expect("job failed");
}

#[test]
fn sum_of_worker_ids() {
    let workers = 4;
    run(workers, move |ctx| {
        let sum = ctx.aggregator_factory().create_aggregator(0i64, |a, b| *a += *b);
        sum.update(&(ctx.global_tid() as i64));
        ctx.aggregator_factory().sync();
        assert_eq!(sum.get_value(), (workers * (workers - 1) / 2) as i64);
    });
}

#[test]
fn kept_aggregates_accumulate_across_syncs() {
    run(3, |ctx| {
        let total = ctx.aggregator_factory().create_aggregator(0u64, |a, b| *a += *b);
        total.update(&1);
        ctx.aggregator_factory().sync();
        assert_eq!(total.get_value(), 3);

        total.update(&1);
        ctx.aggregator_factory().sync();
        assert_eq!(total.get_value(), 6);
    });
}

#[test]
fn reset_each_iter_starts_over() {
    run(3, |ctx| {
        let per_iter = ctx.aggregator_factory().create_aggregator(0u64, |a, b| *a += *b);
        per_iter.to_reset_each_iter();

        per_iter.update(&2);
        ctx.aggregator_factory().sync();
        assert_eq!(per_iter.get_value(), 6);

        per_iter.update(&1);
        ctx.aggregator_factory().sync();
        assert_eq!(per_iter.get_value(), 3);
    });
}

#[test]
fn several_aggregators_use_distinct_centers() {
    run(2, |ctx| {
        let factory = ctx.aggregator_factory();
        let sum = factory.create_aggregator(0i64, |a, b| *a += *b);
        let min = factory.create_aggregator(i64::MAX, |a, b| *a = (*a).min(*b));
        let max = factory.create_aggregator(i64::MIN, |a, b| *a = (*a).max(*b));

        let me = ctx.global_tid() as i64;
        sum.update(&(me + 1));
        min.update(&(10 - me));
        max.update(&(10 - me));
        ctx.aggregator_factory().sync();

        assert_eq!(sum.get_value(), 3);
        assert_eq!(min.get_value(), 9);
        assert_eq!(max.get_value(), 10);
    });
}

#[test]
fn update_any_and_inactive_aggregators() {
    run(2, |ctx| {
        let factory = ctx.aggregator_factory();
        let words = factory.create_aggregator(Vec::<String>::new(), |a, b| {
            a.extend(b.iter().cloned())
        });
        let idle = factory.create_aggregator(0i64, |a, b| *a += *b);
        idle.inactivate();

        let me = ctx.global_tid();
        words.update_any(|list| list.push(format!("w{}", me)));
        idle.update(&5);
        ctx.aggregator_factory().sync();

        let mut seen = words.get_value();
        seen.sort();
        assert_eq!(seen, vec!["w0".to_string(), "w1".to_string()]);
        // Skipped by sync: still at its initial value.
        assert_eq!(idle.get_value(), 0);

        // Activating it lets the retained updates synchronize.
        idle.activate();
        ctx.aggregator_factory().sync();
        assert_eq!(idle.get_value(), 10);
    });
}

#[test]
fn values_agree_on_every_worker_over_iterations() {
    run(4, |ctx| {
        let sum = ctx.aggregator_factory().create_aggregator(0u64, |a, b| *a += *b);
        sum.to_reset_each_iter();
        for round in 1..=5u64 {
            sum.update(&round);
            ctx.aggregator_factory().sync();
            assert_eq!(sum.get_value(), 4 * round);
        }
    });
}
