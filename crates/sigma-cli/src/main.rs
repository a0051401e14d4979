//! `sigma` command-line interface.
//!
//! # Commands
//!
//! - `sigma inspect <model>` - Show the structure of a frozen graph
//! - `sigma solve <model> --delta <r>` - Solve one robustness query
//! - `sigma run --models-dir <d> --experiments-dir <d>` - Sweep layer counts
//!   and perturbation radii, writing report files per configuration

mod experiment;
mod report;
mod robustness;
mod sample;

use clap::{Parser, Subcommand};
use experiment::{run_sweep, SweepConfig};
use robustness::{solve_robustness, RobustnessSpec};
use sigma_core::{Result, SigmaError};
use sigma_graph::FrozenGraph;
use sigma_smt::{ExternalSolver, SolverConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sigma")]
#[command(about = "Robustness queries over frozen sigmoid networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the structure of a frozen graph
    Inspect {
        /// Model file (.json or .json.gz)
        model: PathBuf,
        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Solve one robustness query around the embedded sample
    Solve {
        /// Model file (.json or .json.gz)
        model: PathBuf,
        /// Perturbation radius around the sample
        #[arg(long)]
        delta: f64,
        /// Class expected to win
        #[arg(long, default_value_t = 7)]
        target: usize,
        /// Class challenged against the target
        #[arg(long, default_value_t = 9)]
        runner_up: usize,
        /// Symmetric bound on every raw output
        #[arg(long, default_value_t = sample::OUTPUT_BOUND)]
        output_bound: f64,
        /// Replacement input sample (JSON array file)
        #[arg(long)]
        sample: Option<PathBuf>,
        /// Solver binary (default: probe PATH)
        #[arg(long)]
        solver: Option<PathBuf>,
        /// Wall-clock limit per solve call, in seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
        /// Write raw solver output here
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Sweep layer counts and perturbation radii, writing report files
    Run {
        /// Directory holding mnist_<n>.json model files
        #[arg(long)]
        models_dir: PathBuf,
        /// Root directory for experiment_<N> output
        #[arg(long)]
        experiments_dir: PathBuf,
        /// Layer counts to sweep (default: 10,20,...,90)
        #[arg(long, value_delimiter = ',')]
        counts: Option<Vec<usize>>,
        /// Perturbation radii to sweep (default: the standard grid)
        #[arg(long, value_delimiter = ',')]
        deltas: Option<Vec<f64>>,
        /// Replacement input sample (JSON array file)
        #[arg(long)]
        sample: Option<PathBuf>,
        /// Class expected to win
        #[arg(long, default_value_t = 7)]
        target: usize,
        /// Class challenged against the target
        #[arg(long, default_value_t = 9)]
        runner_up: usize,
        /// Solver binary (default: probe PATH)
        #[arg(long)]
        solver: Option<PathBuf>,
        /// Wall-clock limit per solve call, in seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Inspect { model, json } => inspect(&model, json),
        Commands::Solve {
            model,
            delta,
            target,
            runner_up,
            output_bound,
            sample,
            solver,
            timeout_secs,
            log,
            json,
        } => {
            let graph = FrozenGraph::load(&model)?;
            let input = load_sample(sample.as_deref())?;
            let spec = RobustnessSpec {
                delta,
                target,
                runner_up,
                output_bound,
            };
            let backend = solver_backend(solver, timeout_secs)?;
            let run = solve_robustness(&graph, &input, &spec, &backend, log.as_deref())?;
            print_solve(delta, &run, json);
            Ok(())
        }
        Commands::Run {
            models_dir,
            experiments_dir,
            counts,
            deltas,
            sample,
            target,
            runner_up,
            solver,
            timeout_secs,
        } => {
            let backend = solver_backend(solver, timeout_secs)?;
            let config = SweepConfig {
                models_dir,
                experiments_dir,
                counts: counts.unwrap_or_else(|| sample::SIGMOID_COUNTS.to_vec()),
                deltas: deltas.unwrap_or_else(|| sample::DELTAS.to_vec()),
                sample: load_sample(sample.as_deref())?,
                target,
                runner_up,
                output_bound: sample::OUTPUT_BOUND,
            };
            let experiment_dir = run_sweep(&config, &backend)?;
            println!("experiment written to {}", experiment_dir.display());
            Ok(())
        }
    }
}

fn inspect(model: &std::path::Path, json: bool) -> Result<()> {
    let graph = FrozenGraph::load(model)?;

    if json {
        let layers: Vec<serde_json::Value> = graph
            .layers
            .iter()
            .map(|layer| {
                serde_json::json!({
                    "inputs": layer.input_dim(),
                    "outputs": layer.output_dim(),
                    "activation": layer.activation,
                })
            })
            .collect();
        let info = serde_json::json!({
            "name": graph.name,
            "inputs": graph.input_dim(),
            "outputs": graph.output_dim(),
            "sigmoids": graph.num_sigmoids(),
            "layers": layers,
        });
        println!("{}", info);
    } else {
        println!("name:     {}", graph.name);
        println!("inputs:   {}", graph.input_dim());
        println!("outputs:  {}", graph.output_dim());
        println!("sigmoids: {}", graph.num_sigmoids());
        for (idx, layer) in graph.layers.iter().enumerate() {
            println!(
                "layer {:2}: {} -> {} ({:?})",
                idx,
                layer.input_dim(),
                layer.output_dim(),
                layer.activation
            );
        }
    }
    Ok(())
}

fn print_solve(delta: f64, run: &robustness::RobustnessOutcome, json: bool) {
    if json {
        let assignment: Option<Vec<serde_json::Value>> =
            run.outcome.assignment().map(|assignment| {
                run.input_vars
                    .iter()
                    .chain(run.output_vars.iter())
                    .map(|&var| {
                        serde_json::json!({
                            "var": var.index(),
                            "value": assignment.get(var),
                        })
                    })
                    .collect()
            });
        let value = serde_json::json!({
            "delta": delta,
            "result": if run.outcome.is_sat() { "sat" } else { "unsat" },
            "splits": run.stats.num_splits,
            "active": run.stats.num_active_pl_constraints,
            "total_pl": run.stats.num_pl_constraints,
            "abstracted_equations": run.stats.num_abstracted_equations,
            "time_secs": run.stats.total_time.as_secs_f64(),
            "assignment": assignment,
        });
        println!("{}", value);
        return;
    }

    println!("delta:     {}", delta);
    println!(
        "result:    {}",
        if run.outcome.is_sat() { "SAT" } else { "UNSAT" }
    );
    println!("splits:    {}", run.stats.num_splits);
    println!(
        "active:    {} / {}",
        run.stats.num_active_pl_constraints, run.stats.num_pl_constraints
    );
    println!("equations: {}", run.stats.num_abstracted_equations);
    println!("time:      {}s", run.stats.total_time.as_secs_f64());

    if let Some(assignment) = run.outcome.assignment() {
        for (i, &var) in run.input_vars.iter().enumerate() {
            println!("input {} = {}", i, assignment.get(var).unwrap_or(0.0));
        }
        for (i, &var) in run.output_vars.iter().enumerate() {
            println!("output {} = {}", i, assignment.get(var).unwrap_or(0.0));
        }
    }
}

fn solver_backend(binary: Option<PathBuf>, timeout_secs: u64) -> Result<ExternalSolver> {
    ExternalSolver::from_config(SolverConfig {
        binary,
        timeout: Duration::from_secs(timeout_secs),
        extra_args: Vec::new(),
    })
}

/// The embedded sample, or a replacement loaded from a JSON array file.
fn load_sample(path: Option<&std::path::Path>) -> Result<Vec<f64>> {
    match path {
        None => Ok(sample::MNIST_SAMPLE.to_vec()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| SigmaError::io(format!("reading sample {}", path.display()), e))?;
            serde_json::from_str::<Vec<f64>>(&text).map_err(|e| {
                SigmaError::InvalidQuery(format!("sample {} is not a JSON array: {}", path.display(), e))
            })
        }
    }
}
