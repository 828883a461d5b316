use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{ArgEnum, Args, Parser, Subcommand};
use log::{info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use uuid::Uuid;

use tscflp::{
    fss::{Config, FixedSetSearch},
    greedy,
    models::{FlowOracle, Oracle},
    parse,
    problem::{Cost, Problem},
    solution::{Pattern, Solution},
    termination::Termination,
};

type Error = Box<dyn std::error::Error>;

#[derive(Debug, Clone, Copy, ArgEnum)]
enum OracleKind {
    /// Branch and bound over min cost flows
    Flow,
    /// Gurobi MIP solver (requires the `gurobi` feature)
    Gurobi,
}

#[derive(Debug, Parser)]
#[clap(version, about = "Matheuristics for the two-stage capacitated facility location problem")]
struct Cli {
    /// Seed of the random generator shared by all randomized steps
    #[clap(long, global = true, default_value_t = 42)]
    seed: u64,
    /// Solver used for the flow and the free facilities
    #[clap(long, global = true, arg_enum, default_value = "flow")]
    oracle: OracleKind,
    /// Write a JSON report to this file
    #[clap(long, global = true)]
    output: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[clap(long, default_value_t = 10)]
    population: usize,
    #[clap(long, default_value_t = 5)]
    elite: usize,
    /// Maximum number of facilities left free in each oracle call
    #[clap(long, default_value_t = 10)]
    free_max: usize,
    /// Initial oracle time limit in seconds
    #[clap(long, default_value_t = 1.0)]
    time_limit: f64,
    #[clap(long, default_value_t = 50)]
    iterations: u64,
    /// Stop after this many seconds, regardless of the iteration count
    #[clap(long)]
    timeout: Option<f64>,
    /// Log every iteration
    #[clap(long)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build one greedy solution
    Greedy {
        instance: PathBuf,
        /// Restricted candidate list size, 1 is pure greedy
        #[clap(long, default_value_t = 1)]
        rcl: usize,
    },
    /// Run a fixed set search
    Fss {
        instance: PathBuf,
        #[clap(flatten)]
        args: SearchArgs,
    },
    /// Compare the pure greedy solution with a fixed set search
    Compare {
        instance: PathBuf,
        #[clap(long, default_value_t = 5)]
        population: usize,
        #[clap(long, default_value_t = 50)]
        iterations: u64,
        /// Initial oracle time limit in seconds
        #[clap(long, default_value_t = 30.0)]
        time_limit: f64,
    },
}

#[derive(Debug, Serialize)]
struct Run {
    method: &'static str,
    cost: Cost,
    seconds: f64,
    open_plants: usize,
    open_depots: usize,
    pattern: Pattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<Vec<Cost>>,
}

impl Run {
    fn new(method: &'static str, solution: &Solution, elapsed: Duration) -> Self {
        Run {
            method,
            cost: solution.cost(),
            seconds: elapsed.as_secs_f64(),
            open_plants: solution.pattern().open_plants(),
            open_depots: solution.pattern().open_depots(),
            pattern: solution.pattern().clone(),
            history: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    id: String,
    timestamp: String,
    instance: String,
    seed: u64,
    oracle: String,
    runs: Vec<Run>,
    /// Relative improvement of the search over pure greedy, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    improvement: Option<f64>,
}

fn oracle(kind: OracleKind) -> Result<Box<dyn Oracle>, Error> {
    match kind {
        OracleKind::Flow => Ok(Box::new(FlowOracle::new())),
        #[cfg(feature = "gurobi")]
        OracleKind::Gurobi => Ok(Box::new(tscflp::models::GurobiOracle)),
        #[cfg(not(feature = "gurobi"))]
        OracleKind::Gurobi => Err("this binary was built without the `gurobi` feature".into()),
    }
}

fn load(path: &Path) -> Result<Problem, Error> {
    let problem = parse::from_file(path)?;
    info!(
        "loaded {} with {} plants, {} depots and {} customers (total demand {})",
        path.display(),
        problem.plants().len(),
        problem.depots().len(),
        problem.customers(),
        problem.total_demand()
    );
    Ok(problem)
}

fn summarize(run: &Run) {
    println!(
        "{:<8} cost = {:>14.2}, time = {:>8.2}s, plants = {}, depots = {}",
        run.method, run.cost, run.seconds, run.open_plants, run.open_depots
    );
}

fn run_search(
    problem: &Problem,
    oracle: &dyn Oracle,
    config: Config,
    rng: &mut StdRng,
) -> Result<Run, Error> {
    let start = Instant::now();
    let mut fss = FixedSetSearch::new(problem, oracle, config, rng)?;
    fss.run(rng);

    let mut run = Run::new("fss", fss.best(), start.elapsed());
    run.history = Some(fss.history().to_vec());
    Ok(run)
}

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let oracle = oracle(cli.oracle)?;

    let (instance, runs) = match cli.command {
        Command::Greedy { instance, rcl } => {
            let problem = load(&instance)?;
            let start = Instant::now();
            let solution = greedy::construct(&problem, &*oracle, rcl, &mut rng)?;
            (instance, vec![Run::new("greedy", &solution, start.elapsed())])
        }
        Command::Fss { instance, args } => {
            let problem = load(&instance)?;
            let mut config = Config::new(
                args.population,
                args.elite,
                args.free_max,
                Duration::from_secs_f64(args.time_limit),
                args.iterations,
            );
            config.verbose = args.verbose;
            if let Some(timeout) = args.timeout {
                config.termination = config
                    .termination
                    .or(Termination::Timeout(Instant::now(), Duration::from_secs_f64(timeout)));
            }

            let run = run_search(&problem, &*oracle, config, &mut rng)?;
            (instance, vec![run])
        }
        Command::Compare {
            instance,
            population,
            iterations,
            time_limit,
        } => {
            let problem = load(&instance)?;

            let start = Instant::now();
            let greedy = greedy::construct(&problem, &*oracle, 1, &mut rng)?;
            let greedy = Run::new("greedy", &greedy, start.elapsed());

            let config = Config::new(
                population,
                Config::default().elite_size,
                Config::default().free_size_max,
                Duration::from_secs_f64(time_limit),
                iterations,
            );
            let fss = run_search(&problem, &*oracle, config, &mut rng)?;
            (instance, vec![greedy, fss])
        }
    };

    for run in &runs {
        summarize(run);
    }

    let improvement = match &runs[..] {
        [greedy, fss] if greedy.cost.is_finite() && greedy.cost > 0.0 => {
            let improvement = (greedy.cost - fss.cost) / greedy.cost * 100.0;
            println!("improvement over greedy: {:.2}%", improvement);
            Some(improvement)
        }
        [_, _] => {
            warn!("greedy solution has no finite positive cost, improvement is undefined");
            None
        }
        _ => None,
    };

    if let Some(path) = cli.output {
        let report = Report {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            instance: instance.display().to_string(),
            seed: cli.seed,
            oracle: format!("{:?}", cli.oracle),
            runs,
            improvement,
        };

        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &report)?;
        info!("report written to {}", path.display());
    }

    Ok(())
}
