//! Sylvan simulator binary
//!
//! Usage: `sylvan-sim [problem.json] [config.json]`
//!
//! Without a problem file a random one is generated from the configured
//! seed. Without a configuration file the `SYLVAN_*` environment variables
//! are read. The resulting pseudo-tree is printed in DOT format, and also
//! written to `dot_file` (`SYLVAN_DOT_FILE`) when one is configured.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sylvan_graph::{Problem, RandomProblem};
use sylvan_sim::{run_async, SimulationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sylvan_sim=info,sylvan_dfs=warn,sylvan_lca=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let problem_path = args.next();
    let config = match args.next() {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::from_env()?,
    };

    let problem: Problem = match problem_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let random_vars = if config.sampling.is_some() { 3 } else { 0 };
            RandomProblem::default()
                .with_random_vars(random_vars)
                .generate(&mut rng)?
        }
    };
    tracing::info!(
        variables = problem.variable_count(),
        agents = problem.agents().len(),
        "Problem loaded"
    );

    let report = run_async(&problem, &config).await?;
    for (node, lcas) in &report.lcas {
        tracing::debug!(node = %node, lcas = ?lcas, "LCA set");
    }
    match report.dot() {
        Some(dot) => println!("{dot}"),
        None => tracing::warn!("Not every variable reported its view"),
    }
    Ok(())
}
