//! The experiment sweep: one run over layer counts and perturbation radii.
//!
//! Each invocation claims a fresh `experiment_<N>` directory under the
//! experiments root, with one subdirectory per layer count holding that
//! network's report files and solver logs.

use crate::report::ReportFiles;
use crate::robustness::{solve_robustness, RobustnessSpec};
use sigma_core::{Result, SigmaError};
use sigma_graph::FrozenGraph;
use sigma_smt::Solver;
use std::path::{Path, PathBuf};
use tracing::info;

/// Parameters of one sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Directory holding `mnist_<n>.json` (or `.json.gz`) model files.
    pub models_dir: PathBuf,
    /// Root under which `experiment_<N>` directories are created.
    pub experiments_dir: PathBuf,
    pub counts: Vec<usize>,
    pub deltas: Vec<f64>,
    pub sample: Vec<f64>,
    pub target: usize,
    pub runner_up: usize,
    pub output_bound: f64,
}

/// Infer the next experiment number from existing `experiment_*` entries.
///
/// Any failure along the way (missing root, unreadable entries, no digits)
/// falls back to 1.
pub fn next_experiment_number(experiments_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(experiments_dir) else {
        return 1;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.contains("experiment_"))
        .filter_map(|name| {
            let digits: String = name.chars().filter(char::is_ascii_digit).collect();
            digits.parse::<usize>().ok()
        })
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}

/// Find the model file for a layer count, preferring plain JSON over gzip.
pub fn resolve_model(models_dir: &Path, count: usize) -> Result<PathBuf> {
    let plain = models_dir.join(format!("mnist_{}.json", count));
    if plain.exists() {
        return Ok(plain);
    }
    let gzipped = models_dir.join(format!("mnist_{}.json.gz", count));
    if gzipped.exists() {
        return Ok(gzipped);
    }
    Err(SigmaError::ModelLoad(format!(
        "no model for {} sigmoids: tried {} and {}",
        count,
        plain.display(),
        gzipped.display()
    )))
}

/// Run the full sweep, returning the experiment directory it wrote.
pub fn run_sweep(config: &SweepConfig, solver: &dyn Solver) -> Result<PathBuf> {
    std::fs::create_dir_all(&config.experiments_dir).map_err(|e| {
        SigmaError::io(
            format!(
                "creating experiments root {}",
                config.experiments_dir.display()
            ),
            e,
        )
    })?;

    let number = next_experiment_number(&config.experiments_dir);
    let experiment_dir = config
        .experiments_dir
        .join(format!("experiment_{}", number));
    std::fs::create_dir(&experiment_dir).map_err(|e| {
        SigmaError::io(
            format!("creating experiment dir {}", experiment_dir.display()),
            e,
        )
    })?;
    info!("writing experiment {} to {}", number, experiment_dir.display());

    for &count in &config.counts {
        let net_dir = experiment_dir.join(count.to_string());
        std::fs::create_dir(&net_dir).map_err(|e| {
            SigmaError::io(format!("creating network dir {}", net_dir.display()), e)
        })?;
        let mut reports = ReportFiles::create(&net_dir, count)?;

        for &delta in &config.deltas {
            info!(count, delta, "solving configuration");

            let model_path = resolve_model(&config.models_dir, count)?;
            let graph = FrozenGraph::load(&model_path)?;
            let spec = RobustnessSpec {
                delta,
                target: config.target,
                runner_up: config.runner_up,
                output_bound: config.output_bound,
            };
            let log_path = net_dir.join(format!("solver_mnist_{}_{}.log", count, delta));

            let run = solve_robustness(&graph, &config.sample, &spec, solver, Some(&log_path))?;
            reports.append(count, delta, &run)?;
        }
    }

    Ok(experiment_dir)
}
