//! The tokio runtime reaches the same kind of result as the deterministic network.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sylvan_dfs::check_tree;
use sylvan_graph::RandomProblem;
use sylvan_lca::SamplingConfig;
use sylvan_sim::{run_async, SimulationConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn agent_tasks_build_a_valid_pseudo_tree() {
    for seed in 0..5 {
        let p = RandomProblem::default().generate(&mut StdRng::seed_from_u64(seed)).unwrap();
        let report = run_async(&p, &SimulationConfig::default().with_seed(seed)).await.unwrap();
        check_tree(&p, &report.views).unwrap();
        assert_eq!(report.outputs.len(), p.variable_count());
        assert!(report.dot().is_some());
    }
}

#[tokio::test]
async fn parallel_arbitration_with_sampling() {
    let p = RandomProblem::default()
        .with_random_vars(3)
        .generate(&mut StdRng::seed_from_u64(17))
        .unwrap();
    let config = SimulationConfig::default()
        .with_parallel(true)
        .with_sampling(SamplingConfig::default());
    let report = run_async(&p, &config).await.unwrap();
    check_tree(&p, &report.views).unwrap();
    assert_eq!(report.projections.len(), p.variable_count());
    assert_eq!(report.lcas.len(), p.variable_count());
}

#[tokio::test]
async fn empty_problem_stops_at_once() {
    let report = run_async(&Default::default(), &SimulationConfig::default()).await.unwrap();
    assert_eq!(report.steps, 0);
    assert!(report.outputs.is_empty());
}
