use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use blend_search::{
    BlendError, BlendState, Composition, Configuration, EvaluationMode, Operation, SearchOptions,
    SearchOutcome, Solver,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Driver {
    Greedy,
    Random,
    Full,
    Descend,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Evaluation {
    Containers,
    Lookahead,
}

impl From<Evaluation> for EvaluationMode {
    fn from(evaluation: Evaluation) -> Self {
        match evaluation {
            Evaluation::Containers => EvaluationMode::Containers,
            Evaluation::Lookahead => EvaluationMode::Lookahead,
        }
    }
}

/// Find fill and pour steps that blend liquids toward a target proportion.
#[derive(Parser, Debug)]
#[command(name = "blend")]
struct Args {
    /// Container capacities, one integer per line
    capacities: PathBuf,

    /// Target composition, one quantity per liquid per line
    target: PathBuf,

    /// Search options in TOML
    #[arg(short, long)]
    options: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Driver::Greedy)]
    driver: Driver,

    /// Overrides the evaluation mode from the options file
    #[arg(short, long, value_enum)]
    evaluation: Option<Evaluation>,
}

fn read_lines<T: std::str::FromStr>(path: &Path) -> anyhow::Result<Vec<T>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<T>()
                .map_err(|_| BlendError::Parse(format!("{}: cannot parse {line:?}", path.display())))
        })
        .collect::<Result<Vec<T>, BlendError>>()
        .map_err(Into::into)
}

fn outcome_parts(outcome: SearchOutcome) -> (Vec<Operation>, f64, Arc<BlendState>) {
    (outcome.operations, outcome.distance, outcome.state)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let capacities: Vec<u32> = read_lines(&args.capacities)?;
    let target = Composition::new(read_lines(&args.target)?);
    let mut options = match &args.options {
        Some(path) => SearchOptions::from_toml_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => SearchOptions::default(),
    };
    if let Some(evaluation) = args.evaluation {
        options = options.with_evaluation_mode(evaluation.into());
    }

    let configuration = Arc::new(Configuration::new(capacities, target, options)?);
    let mut solver = Solver::new(configuration);
    let (operations, distance, state) = match args.driver {
        Driver::Greedy => outcome_parts(solver.greedy()),
        Driver::Random => outcome_parts(solver.random_walk()),
        Driver::Full => outcome_parts(solver.expand_full()),
        Driver::Descend => {
            let descent = solver.descend();
            (descent.operations, descent.distance, Arc::new(descent.state))
        }
    };

    for (i, op) in operations.iter().enumerate() {
        println!("Step {}: {op}", i + 1);
    }
    println!("Distance from target = {distance:.6}");
    print!("{state}");
    Ok(())
}
