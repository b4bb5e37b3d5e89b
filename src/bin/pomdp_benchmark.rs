//! Benchmark runner: solve models with each algorithm and report CSV rows.
//!
//! One row per (model, algorithm) pair, in the order models are loaded and
//! algorithms are listed.
//!
//! Usage:
//!   cargo run --release --bin pomdp_benchmark -- [OPTIONS]
//!
//! Options:
//!   --model <FILE>        Raw JSON model (default: built-in tiger and coin)
//!   --algorithm <NAME>    pbvi, perseus, hsvi2 or all (default: all)
//!   --beliefs <N>         Belief points to add by expansion (default: 64)
//!   --expansion <NAME>    random, random_unique or distinct_beliefs (default: random_unique)
//!   --max-trials <N>      Expansion simulation budget (default: 10000)
//!   --epsilon <VALUE>     Convergence threshold (default: per algorithm)
//!   --iterations <N>      PBVI/Perseus iteration cap (default: 1000)
//!   --trials <N>          HSVI2 trial cap (default: 1000)
//!   --time-limit <SECS>   Wall-clock budget per solve (optional)
//!   --threads <N>         Number of threads (default: auto)
//!   --seed <N>            Random seed (default: 42)
//!   --adr-trials <N>      Monte-Carlo rollouts for ADR (default: 100)
//!   --output <FILE>       Also write the CSV report to FILE
//!   --policy-dir <DIR>    Save each policy as JSON under DIR
//!
//! Set `RUST_LOG=debug` for per-iteration logging.

use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process;

use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pomdp_solver::domains::{coin, tiger};
use pomdp_solver::pomdp::{
    Algorithm, BeliefSet, EvaluationReport, Evaluator, EvaluatorConfig, ExpansionMethod, ModelStore, Solver,
    SolverConfig,
};

struct Options {
    model: Option<PathBuf>,
    algorithms: Vec<Algorithm>,
    beliefs: usize,
    expansion: ExpansionMethod,
    max_trials: usize,
    epsilon: Option<f64>,
    iterations: Option<usize>,
    trials: Option<usize>,
    time_limit: Option<f64>,
    threads: Option<usize>,
    seed: u64,
    adr_trials: usize,
    output: Option<PathBuf>,
    policy_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            model: None,
            algorithms: Algorithm::ALL.to_vec(),
            beliefs: 64,
            expansion: ExpansionMethod::RandomUnique,
            max_trials: 10_000,
            epsilon: None,
            iterations: None,
            trials: None,
            time_limit: None,
            threads: None,
            seed: 42,
            adr_trials: 100,
            output: None,
            policy_dir: None,
        }
    }
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, Box<dyn Error>> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {}", flag).into())
}

fn parse_args() -> Result<Options, Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || value_of(&args, i, flag);

        match flag {
            "--model" | "-m" => options.model = Some(PathBuf::from(value()?)),
            "--algorithm" | "-a" => {
                options.algorithms = match value()? {
                    "all" => Algorithm::ALL.to_vec(),
                    name => vec![name.parse()?],
                };
            }
            "--beliefs" | "-b" => options.beliefs = value()?.parse()?,
            "--expansion" => {
                options.expansion = match value()? {
                    "random" => ExpansionMethod::Random,
                    "random_unique" => ExpansionMethod::RandomUnique,
                    "distinct_beliefs" => ExpansionMethod::DistinctBeliefs,
                    other => return Err(format!("unknown expansion method `{}`", other).into()),
                };
            }
            "--max-trials" => options.max_trials = value()?.parse()?,
            "--epsilon" | "-e" => options.epsilon = Some(value()?.parse()?),
            "--iterations" | "-i" => options.iterations = Some(value()?.parse()?),
            "--trials" => options.trials = Some(value()?.parse()?),
            "--time-limit" => options.time_limit = Some(value()?.parse()?),
            "--threads" | "-t" => options.threads = Some(value()?.parse()?),
            "--seed" | "-s" => options.seed = value()?.parse()?,
            "--adr-trials" => options.adr_trials = value()?.parse()?,
            "--output" | "-o" => options.output = Some(PathBuf::from(value()?)),
            "--policy-dir" => options.policy_dir = Some(PathBuf::from(value()?)),
            "--help" | "-h" => {
                println!("Usage: pomdp_benchmark [--model FILE] [--algorithm NAME] [--beliefs N] ...");
                println!("See the module documentation for all options.");
                process::exit(0);
            }
            other => return Err(format!("unknown option `{}`", other).into()),
        }
        i += 2;
    }

    Ok(options)
}

fn solver_config(options: &Options, algorithm: Algorithm) -> SolverConfig {
    let mut config = SolverConfig::for_algorithm(algorithm).with_seed(options.seed);
    if let Some(epsilon) = options.epsilon {
        config = config.with_epsilon(epsilon);
    }
    if let Some(iterations) = options.iterations {
        config = config.with_max_iterations(iterations);
    }
    if let Some(trials) = options.trials {
        config.hsvi2.trials = trials;
    }
    if let Some(seconds) = options.time_limit {
        config = config.with_time_limit(seconds);
    }
    if let Some(threads) = options.threads {
        config = config.with_threads(threads);
    }
    config
}

fn load_models(options: &Options) -> Result<Vec<(String, ModelStore)>, Box<dyn Error>> {
    match &options.model {
        Some(path) => {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "model".to_string());
            Ok(vec![(name, ModelStore::from_json_file(path)?)])
        }
        None => Ok(vec![
            ("tiger".to_string(), tiger::standard()?),
            ("coin".to_string(), coin::standard()?),
        ]),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let options = parse_args()?;
    let models = load_models(&options)?;

    if let Some(dir) = &options.policy_dir {
        fs::create_dir_all(dir)?;
    }

    let progress = ProgressBar::new((models.len() * options.algorithms.len()) as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut rows = vec![EvaluationReport::CSV_HEADER.to_string()];

    for (name, model) in &models {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut beliefs = BeliefSet::from_initial(model);
        let expansion = beliefs.expand(model, options.expansion, options.beliefs, options.max_trials, &mut rng);
        log::info!(
            "{}: {} belief points ({} added in {} trials)",
            name,
            beliefs.len(),
            expansion.added,
            expansion.trials
        );

        for &algorithm in &options.algorithms {
            progress.set_message(format!("{} / {}", name, algorithm));

            let config = solver_config(&options, algorithm);
            let mut solver = Solver::new(model, config)?;
            let outcome = solver.solve(&beliefs);

            let mut evaluator_config = EvaluatorConfig::default()
                .with_trials(options.adr_trials)
                .with_seed(options.seed);
            if let Some(threads) = options.threads {
                evaluator_config = evaluator_config.with_threads(threads);
            }
            let adr = Evaluator::new(evaluator_config)?.compute_adr(model, &outcome.policy, model.initial_belief());

            let report = EvaluationReport::new(model, &beliefs, &outcome, adr.mean);
            log::info!(
                "{} / {}: {:?}, V(b0) = {:.5}, ADR = {:.5} ± {:.5}",
                name,
                algorithm,
                outcome.stats.termination,
                report.value,
                adr.mean,
                adr.standard_error
            );
            rows.push(report.to_csv_row());

            if let Some(dir) = &options.policy_dir {
                outcome.policy.save_json(dir.join(format!("{}_{}.json", name, algorithm)))?;
            }
            progress.inc(1);
        }
    }
    progress.finish_and_clear();

    let csv = rows.join("\n");
    println!("{}", csv);
    if let Some(path) = &options.output {
        fs::write(path, csv + "\n")?;
        log::info!("wrote report to {}", path.display());
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}
