//! End-to-end iterative algorithms over the full stack.

use lockstep::{
    impl_serialize, list_execute, ChannelHandle, Keyed, MinCombiner, ObjList, ProcessEnv,
    SumCombiner, WorkerContext,
};

#[derive(Clone, Debug)]
struct Vertex {
    id: u64,
    rank: f64,
    label: u64,
    adj: Vec<u64>,
}
impl_serialize!(Vertex { id, rank, label, adj });

impl Keyed for Vertex {
    type Key = u64;
    fn id(&self) -> &u64 {
        &self.id
    }
    fn with_key(key: u64) -> Self {
        Vertex { id: key, rank: 0.0, label: key, adj: Vec::new() }
    }
}

fn run(workers: usize, job: impl Fn(&mut WorkerContext) + Send + Sync) {
    let _ = env_logger::builder().is_test(true).try_init();
    let env = ProcessEnv::local(workers).expect("local environment");
    lockstep::run_job(env, job).expect("job failed");
}

/// Loads the vertices this worker owns, sorted for binary search.
fn load_owned(ctx: &WorkerContext, edges: &[(u64, Vec<u64>)]) -> ObjList<Vertex> {
    let mut vertices = ObjList::new();
    for (id, adj) in edges {
        if ctx.hash_ring().hash_lookup(id) == ctx.global_tid() {
            vertices.add_object(Vertex { id: *id, rank: 1.0, label: *id, adj: adj.clone() });
        }
    }
    vertices.sort();
    vertices
}

#[test]
fn pagerank_on_a_chain() {
    const DAMPING: f64 = 0.85;
    const ITERS: usize = 10;

    // 1 -> 2 -> 3 -> 4; vertex 4 is dangling.
    let graph: Vec<(u64, Vec<u64>)> =
        vec![(1, vec![2]), (2, vec![3]), (3, vec![4]), (4, vec![])];

    // Sequential reference of the same iteration.
    let mut expected = [1.0f64; 4];
    for _ in 0..ITERS {
        let mut incoming = [0.0f64; 4];
        for (id, adj) in &graph {
            for dst in adj {
                incoming[(dst - 1) as usize] += expected[(id - 1) as usize] / adj.len() as f64;
            }
        }
        for v in 0..4 {
            expected[v] = (1.0 - DAMPING) + DAMPING * incoming[v];
        }
    }

    run(2, move |ctx| {
        let channel = ctx.create_push_combined_channel::<f64, SumCombiner<f64>, Vertex>();
        let mut vertices = load_owned(ctx, &graph);
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        // Each superstep pushes rank/degree along the edges and applies the
        // damped update from the previous superstep's messages.
        for _ in 0..ITERS {
            list_execute(ctx, &mut vertices, &channels, &channels, 1, |vertex, idx| {
                if let Some(sum) = channel.borrow().get_at(idx) {
                    vertex.rank = (1.0 - DAMPING) + DAMPING * sum;
                }
                let share = vertex.rank / vertex.adj.len().max(1) as f64;
                for dst in vertex.adj.clone() {
                    channel.borrow_mut().push(share, &dst);
                }
            });
        }
        // Apply the final round of messages without producing new ones.
        list_execute(ctx, &mut vertices, &channels, &[], 1, |vertex, idx| {
            if let Some(sum) = channel.borrow().get_at(idx) {
                vertex.rank = (1.0 - DAMPING) + DAMPING * sum;
            }
        });

        for idx in 0..vertices.vector_size() {
            let vertex = vertices.get(idx);
            let want = expected[(vertex.id - 1) as usize];
            assert!(
                (vertex.rank - want).abs() < 1e-6,
                "vertex {}: rank {} want {}",
                vertex.id,
                vertex.rank,
                want
            );
        }
    });
}

#[test]
fn connected_components_on_k4_plus_isolated() {
    // K4 over {1,2,3,4} plus the isolated vertex 5.
    let graph: Vec<(u64, Vec<u64>)> = vec![
        (1, vec![2, 3, 4]),
        (2, vec![1, 3, 4]),
        (3, vec![1, 2, 4]),
        (4, vec![1, 2, 3]),
        (5, vec![]),
    ];

    run(2, move |ctx| {
        let channel = ctx.create_push_combined_channel::<u64, MinCombiner<u64>, Vertex>();
        let mut vertices = load_owned(ctx, &graph);
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        // Min-label propagation; the clique converges after one hop, extra
        // rounds are harmless.
        for _ in 0..4 {
            list_execute(ctx, &mut vertices, &channels, &channels, 1, |vertex, idx| {
                if let Some(min) = channel.borrow().get_at(idx) {
                    vertex.label = vertex.label.min(*min);
                }
                for dst in vertex.adj.clone() {
                    channel.borrow_mut().push(vertex.label, &dst);
                }
            });
        }
        list_execute(ctx, &mut vertices, &channels, &[], 1, |vertex, idx| {
            if let Some(min) = channel.borrow().get_at(idx) {
                vertex.label = vertex.label.min(*min);
            }
        });

        for idx in 0..vertices.vector_size() {
            let vertex = vertices.get(idx);
            let want = if vertex.id == 5 { 5 } else { 1 };
            assert_eq!(vertex.label, want, "component of vertex {}", vertex.id);
        }
    });
}

#[test]
fn pagerank_total_mass_via_aggregator() {
    let graph: Vec<(u64, Vec<u64>)> =
        vec![(1, vec![2]), (2, vec![3]), (3, vec![1]), (4, vec![1])];

    run(2, move |ctx| {
        let channel = ctx.create_push_combined_channel::<f64, SumCombiner<f64>, Vertex>();
        let total = ctx.aggregator_factory().create_aggregator(0.0f64, |a, b| *a += *b);
        total.to_reset_each_iter();
        let mut vertices = load_owned(ctx, &graph);
        let handle: ChannelHandle = channel.clone();
        let channels = [handle];

        for _ in 0..3 {
            list_execute(ctx, &mut vertices, &channels, &channels, 1, |vertex, idx| {
                if let Some(sum) = channel.borrow().get_at(idx) {
                    vertex.rank = 0.15 + 0.85 * sum;
                }
                total.update(&vertex.rank);
                let share = vertex.rank / vertex.adj.len().max(1) as f64;
                for dst in vertex.adj.clone() {
                    channel.borrow_mut().push(share, &dst);
                }
            });
            ctx.aggregator_factory().sync();
            // Every worker observes the same cluster-wide rank mass.
            assert!(total.get_value() > 0.0);
        }
    });
}
