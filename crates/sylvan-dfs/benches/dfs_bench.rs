//! Benchmarks for Sylvan DFS generation
//!
//! Measures a full single-agent traversal of random constraint graphs, with
//! and without parallel root arbitration.

use std::collections::VecDeque;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sylvan_dfs::{DfsConfig, DfsGeneration, DfsProtocol, Message, ParallelDfsGeneration, RootNotification};
use sylvan_graph::{AgentId, Problem, RandomProblem, RootId, Scoring};

/// Random graph with every variable owned by agent `a0`.
fn single_agent(max_vars: usize, seed: u64) -> Problem {
    let mut rng = StdRng::seed_from_u64(seed);
    RandomProblem {
        max_vars,
        max_edges: max_vars * 3,
        max_agents: 1,
        random_vars: 0,
    }
    .generate(&mut rng)
    .expect("random problem")
}

fn drain(dfs: &mut dyn DfsProtocol, mut queue: VecDeque<Message>) -> usize {
    let mut handled = 0;
    while let Some(msg) = queue.pop_front() {
        let out = dfs.handle(msg).expect("dfs step");
        queue.extend(out.sends.into_iter().map(|(_, m)| m));
        queue.extend(out.deferred);
        handled += 1;
    }
    handled
}

fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("dfs_generation");
    for &size in &[10usize, 50, 200] {
        let problem = single_agent(size, 7);
        let sub = Arc::new(problem.subproblem(&AgentId::from("a0")));
        let roots: Vec<RootId> = problem
            .components()
            .into_iter()
            .filter_map(|c| c.into_iter().filter_map(|n| Scoring::VarName.root_id(&n, &problem)).max())
            .collect();
        group.throughput(Throughput::Elements(problem.variable_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &roots, |b, roots| {
            b.iter(|| {
                let mut dfs = DfsGeneration::new(Arc::clone(&sub), DfsConfig::default());
                let queue = roots
                    .iter()
                    .map(|r| {
                        Message::Root(RootNotification {
                            root: r.clone(),
                            node: r.node.clone(),
                            is_root: true,
                        })
                    })
                    .collect();
                black_box(drain(&mut dfs, queue))
            })
        });
    }
    group.finish();
}

fn bench_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_dfs_generation");
    for &size in &[10usize, 50, 200] {
        let problem = single_agent(size, 11);
        let sub = Arc::new(problem.subproblem(&AgentId::from("a0")));
        group.throughput(Throughput::Elements(problem.variable_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &sub, |b, sub| {
            b.iter(|| {
                let mut dfs = ParallelDfsGeneration::new(Arc::clone(sub), DfsConfig::default());
                let start = dfs.start().expect("start");
                let queue = start.sends.into_iter().map(|(_, m)| m).collect();
                black_box(drain(&mut dfs, queue))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sequential, bench_parallel);
criterion_main!(benches);
