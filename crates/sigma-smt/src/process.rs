//! Blocking invocation of an external SMT solver binary.
//!
//! The encoded formula is written to a problem file, the solver runs as a
//! subprocess with its output captured to a log file, and the raw output is
//! parsed back into a [`SolveOutcome`] plus statistics. The solver itself is
//! a black box; only its textual answer crosses the boundary.

use crate::encoder::Encoded;
use crate::model_parser::parse_assignment;
use sigma_core::{Assignment, Result, SigmaError, SolveOutcome, SolveStats, VarId};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binary names probed on `PATH` when no solver is configured.
const SOLVER_CANDIDATES: &[&str] = &["z3", "cvc5"];

/// Poll interval while waiting for the solver process.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// How to reach the external solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Explicit solver binary; when `None`, known solvers are probed on PATH.
    pub binary: Option<PathBuf>,
    /// Hard wall-clock limit for one solve call.
    pub timeout: Duration,
    /// Extra arguments passed before the problem file.
    pub extra_args: Vec<String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout: Duration::from_secs(600),
            extra_args: Vec::new(),
        }
    }
}

/// A blocking solve backend.
pub trait Solver {
    /// Solve an encoded query. Raw solver output is written to `log_path`
    /// when given.
    fn solve(&self, encoded: &Encoded, log_path: Option<&Path>)
        -> Result<(SolveOutcome, SolveStats)>;
}

/// An SMT solver reached as a subprocess.
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    binary: PathBuf,
    config: SolverConfig,
}

impl ExternalSolver {
    /// Probe `PATH` for a known solver binary.
    pub fn detect() -> Option<Self> {
        for name in SOLVER_CANDIDATES {
            if let Some(path) = find_executable(name) {
                debug!("detected solver binary {}", path.display());
                return Some(Self {
                    binary: path,
                    config: SolverConfig::default(),
                });
            }
        }
        None
    }

    /// Use a specific solver binary.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: path.into(),
            config: SolverConfig::default(),
        }
    }

    /// Resolve a solver from configuration, probing PATH when no binary is
    /// named.
    pub fn from_config(config: SolverConfig) -> Result<Self> {
        if let Some(path) = config.binary.clone() {
            return Ok(Self {
                binary: path,
                config,
            });
        }
        let mut solver = Self::detect().ok_or_else(|| {
            SigmaError::SolverNotFound(format!(
                "none of {:?} found on PATH",
                SOLVER_CANDIDATES
            ))
        })?;
        solver.config = config;
        Ok(solver)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn build_args(&self, problem: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        let stem = self
            .binary
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let timeout_secs = self.config.timeout.as_secs().max(1);
        if stem.starts_with("z3") {
            args.push("-smt2".into());
            args.push("-st".into());
            args.push(format!("-T:{}", timeout_secs).into());
        } else if stem.starts_with("cvc5") {
            args.push(format!("--tlimit={}", timeout_secs * 1000).into());
        }

        for extra in &self.config.extra_args {
            args.push(extra.into());
        }
        args.push(problem.as_os_str().to_owned());
        args
    }
}

impl Solver for ExternalSolver {
    fn solve(
        &self,
        encoded: &Encoded,
        log_path: Option<&Path>,
    ) -> Result<(SolveOutcome, SolveStats)> {
        let workdir = tempfile::tempdir()
            .map_err(|e| SigmaError::io("creating solver working directory".to_string(), e))?;
        let problem_path = workdir.path().join("query.smt2");
        std::fs::write(&problem_path, &encoded.formula).map_err(|e| {
            SigmaError::io(
                format!("writing problem file {}", problem_path.display()),
                e,
            )
        })?;

        let output_path: PathBuf = match log_path {
            Some(p) => p.to_path_buf(),
            None => workdir.path().join("solver.out"),
        };
        let output_file = File::create(&output_path).map_err(|e| {
            SigmaError::io(format!("creating solver log {}", output_path.display()), e)
        })?;
        let stderr_file = output_file
            .try_clone()
            .map_err(|e| SigmaError::io("duplicating solver log handle".to_string(), e))?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(&problem_path))
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::from(stderr_file));

        debug!("running solver: {:?}", cmd);
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SigmaError::SolverExecution(format!("{}: {}", self.binary.display(), e)))?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() >= self.config.timeout {
                        warn!("solver exceeded {:?}, killing", self.config.timeout);
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(SigmaError::SolverTimeout(self.config.timeout));
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(e) => {
                    return Err(SigmaError::SolverExecution(format!(
                        "waiting for solver: {}",
                        e
                    )))
                }
            }
        };
        let total_time = start.elapsed();

        let output = std::fs::read_to_string(&output_path).map_err(|e| {
            SigmaError::io(format!("reading solver log {}", output_path.display()), e)
        })?;

        let stats = SolveStats {
            num_splits: scrape_splits(&output),
            num_active_pl_constraints: encoded.stats.num_active_pl_constraints,
            num_pl_constraints: encoded.stats.num_pl_constraints,
            num_abstracted_equations: encoded.stats.num_abstracted_equations,
            total_time,
        };

        match outcome_token(&output) {
            Some(OutcomeToken::Unsat) => Ok((SolveOutcome::Unsat, stats)),
            Some(OutcomeToken::Sat) => {
                let assignment = parse_assignment(&output)?;
                let assignment = complete_assignment(assignment, encoded.num_vars);
                Ok((SolveOutcome::Sat(assignment), stats))
            }
            Some(OutcomeToken::Unknown) => Err(SigmaError::SolverUnknown(unknown_reason(&output))),
            None => Err(SigmaError::SolverExecution(format!(
                "no sat/unsat answer (exit {:?}): {}",
                status.code(),
                output.lines().next().unwrap_or("empty output")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeToken {
    Sat,
    Unsat,
    Unknown,
}

/// Find the solver's verdict: the first output line that is exactly `sat`,
/// `unsat`, or `unknown`.
fn outcome_token(output: &str) -> Option<OutcomeToken> {
    for line in output.lines() {
        match line.trim() {
            "sat" => return Some(OutcomeToken::Sat),
            "unsat" => return Some(OutcomeToken::Unsat),
            "unknown" => return Some(OutcomeToken::Unknown),
            _ => {}
        }
    }
    None
}

fn unknown_reason(output: &str) -> String {
    if let Some(start) = output.find("(:reason-unknown") {
        let rest = &output[start..];
        if let Some(end) = rest.find(')') {
            return rest[..=end].to_string();
        }
    }
    "solver gave no reason".to_string()
}

/// Pull a split count out of the solver's statistics output, when present.
///
/// Looks for `:num-splits`, `:splits`, then `:decisions`, in `:key value`
/// form with an optional closing parenthesis on the value.
fn scrape_splits(output: &str) -> u64 {
    for key in [":num-splits", ":splits", ":decisions"] {
        let mut tokens = output.split_whitespace();
        while let Some(token) = tokens.next() {
            // The first key of a statistics block is glued to the opening
            // paren, e.g. `(:decisions 42`.
            if token.trim_start_matches('(') == key {
                if let Some(value) = tokens.next() {
                    if let Ok(n) = value.trim_end_matches(')').parse::<u64>() {
                        return n;
                    }
                }
            }
        }
    }
    0
}

/// Extend a parsed model to a total assignment over all query variables.
///
/// Solvers omit variables that are unconstrained in the model; any feasible
/// value completes the assignment, so those default to zero.
fn complete_assignment(mut assignment: Assignment, num_vars: usize) -> Assignment {
    for idx in 0..num_vars {
        let var = VarId(idx);
        if assignment.get(var).is_none() {
            debug!("model omitted {}, defaulting to 0", var);
            assignment.insert(var, 0.0);
        }
    }
    assignment
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use crate::query::Query;
    use sigma_core::{Equation, EquationKind};
    use sigma_graph::{Activation, FrozenGraph, LayerSpec};

    fn tiny_graph() -> FrozenGraph {
        FrozenGraph {
            name: "tiny".to_string(),
            layers: vec![
                LayerSpec {
                    weights: vec![vec![1.0]],
                    bias: vec![0.0],
                    activation: Activation::Sigmoid,
                },
                LayerSpec {
                    weights: vec![vec![1.0]],
                    bias: vec![0.0],
                    activation: Activation::Identity,
                },
            ],
        }
    }

    fn encoded_feasible(graph: &FrozenGraph) -> Encoded {
        let mut q = Query::new(graph);
        for &v in &q.input_variables().to_vec() {
            q.set_lower_bound(v, -1.0).unwrap();
            q.set_upper_bound(v, 1.0).unwrap();
        }
        encode(&q).unwrap()
    }

    #[test]
    fn test_outcome_token() {
        assert_eq!(outcome_token("sat\n(model)\n"), Some(OutcomeToken::Sat));
        assert_eq!(outcome_token("stats\nunsat\n"), Some(OutcomeToken::Unsat));
        assert_eq!(outcome_token("unknown\n"), Some(OutcomeToken::Unknown));
        // Verdict must be a whole line, not a substring.
        assert_eq!(outcome_token("saturated\n"), None);
        assert_eq!(outcome_token(""), None);
    }

    #[test]
    fn test_unknown_reason() {
        let output = "unknown\n(:reason-unknown \"timeout\")\n";
        assert!(unknown_reason(output).contains("timeout"));
        assert_eq!(unknown_reason("unknown\n"), "solver gave no reason");
    }

    #[test]
    fn test_scrape_splits() {
        assert_eq!(scrape_splits("(:decisions 42\n :restarts 1)"), 42);
        assert_eq!(scrape_splits(":num-splits 7"), 7);
        assert_eq!(scrape_splits("(:splits 3)"), 3);
        assert_eq!(scrape_splits("sat\n"), 0);
        // Preference order: explicit split counters beat decisions.
        assert_eq!(scrape_splits(":decisions 10 :num-splits 2"), 2);
    }

    #[test]
    fn test_complete_assignment_fills_missing() {
        let partial: Assignment = [(VarId(1), 5.0)].into_iter().collect();
        let full = complete_assignment(partial, 3);
        assert_eq!(full.len(), 3);
        assert_eq!(full.get(VarId(0)), Some(0.0));
        assert_eq!(full.get(VarId(1)), Some(5.0));
        assert_eq!(full.get(VarId(2)), Some(0.0));
    }

    #[test]
    fn test_build_args_z3_shape() {
        let solver = ExternalSolver::with_binary("/opt/bin/z3");
        let args = solver.build_args(Path::new("/tmp/q.smt2"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-smt2".to_string()));
        assert!(args.contains(&"-st".to_string()));
        assert!(args.iter().any(|a| a.starts_with("-T:")));
        assert_eq!(args.last().unwrap(), "/tmp/q.smt2");
    }

    #[test]
    fn test_build_args_unknown_solver_passes_only_extras() {
        let mut solver = ExternalSolver::with_binary("/opt/bin/mysolver");
        solver.config.extra_args = vec!["--fast".to_string()];
        let args = solver.build_args(Path::new("/tmp/q.smt2"));
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], OsString::from("--fast"));
    }

    #[test]
    fn test_from_config_keeps_explicit_binary() {
        let config = SolverConfig {
            binary: Some(PathBuf::from("/opt/bin/z3")),
            ..Default::default()
        };
        let solver = ExternalSolver::from_config(config).unwrap();
        assert_eq!(solver.binary(), Path::new("/opt/bin/z3"));
    }

    #[test]
    fn test_solve_missing_binary_is_execution_error() {
        let solver = ExternalSolver::with_binary("/nonexistent/solver");
        let g = tiny_graph();
        let encoded = encoded_feasible(&g);
        let err = solver.solve(&encoded, None).unwrap_err();
        assert!(matches!(err, SigmaError::SolverExecution(_)));
    }

    #[test]
    fn test_solve_non_solver_binary_has_no_verdict() {
        // /bin/echo exits zero without printing sat or unsat.
        if !Path::new("/bin/echo").exists() {
            return;
        }
        let solver = ExternalSolver::with_binary("/bin/echo");
        let g = tiny_graph();
        let encoded = encoded_feasible(&g);
        let err = solver.solve(&encoded, None).unwrap_err();
        assert!(matches!(err, SigmaError::SolverExecution(_)));
        assert!(err.to_string().contains("no sat/unsat answer"));
    }

    #[cfg(unix)]
    #[test]
    fn test_solve_timeout_kills_solver() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let mut solver = ExternalSolver::with_binary("/bin/sh");
        solver.config.timeout = Duration::from_millis(100);
        solver.config.extra_args = vec!["-c".to_string(), "sleep 5".to_string()];

        let g = tiny_graph();
        let encoded = encoded_feasible(&g);
        let start = Instant::now();
        let err = solver.solve(&encoded, None).unwrap_err();
        assert!(matches!(err, SigmaError::SolverTimeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_solve_writes_log_file() {
        if !Path::new("/bin/echo").exists() {
            return;
        }
        let solver = ExternalSolver::with_binary("/bin/echo");
        let g = tiny_graph();
        let encoded = encoded_feasible(&g);
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");

        let _ = solver.solve(&encoded, Some(&log));
        assert!(log.exists());
    }

    // Tests below run only when a real solver is installed.

    #[test]
    fn test_solve_feasible_box_is_sat() {
        let Some(solver) = ExternalSolver::detect() else {
            return;
        };
        let g = tiny_graph();
        let mut q = Query::new(&g);
        for &v in &q.input_variables().to_vec() {
            q.set_lower_bound(v, -1.0).unwrap();
            q.set_upper_bound(v, 1.0).unwrap();
        }
        let encoded = encode(&q).unwrap();

        let (outcome, stats) = solver.solve(&encoded, None).unwrap();
        assert!(outcome.is_sat());
        let assignment = outcome.assignment().unwrap();
        assert_eq!(assignment.len(), encoded.num_vars);

        // The model respects the input box.
        let x = assignment.get(q.input_variables()[0]).unwrap();
        assert!((-1.0..=1.0).contains(&x));
        assert!(stats.total_time > Duration::ZERO);
        assert_eq!(stats.num_pl_constraints, 1);
    }

    #[test]
    fn test_solve_contradictory_free_variable_is_unsat() {
        let Some(solver) = ExternalSolver::detect() else {
            return;
        };
        let g = tiny_graph();
        let mut q = Query::new(&g);
        for &v in &q.input_variables().to_vec() {
            q.set_lower_bound(v, -1.0).unwrap();
            q.set_upper_bound(v, 1.0).unwrap();
        }
        let s = q.new_variable();
        q.set_lower_bound(s, 1.0).unwrap();
        q.set_upper_bound(s, 0.0).unwrap();

        let encoded = encode(&q).unwrap();
        let (outcome, _) = solver.solve(&encoded, None).unwrap();
        assert!(outcome.is_unsat());
    }

    #[test]
    fn test_solve_side_equation_forces_output_gap() {
        let Some(solver) = ExternalSolver::detect() else {
            return;
        };
        // Output is sigmoid(x) with x in [-1, 1], so it stays in
        // (0.26, 0.74). Requiring output + s = 0 with s >= 0 forces a
        // non-positive output, which the abstraction refutes.
        let g = tiny_graph();
        let mut q = Query::new(&g);
        for &v in &q.input_variables().to_vec() {
            q.set_lower_bound(v, -1.0).unwrap();
            q.set_upper_bound(v, 1.0).unwrap();
        }
        let out = q.output_variables()[0];
        let s = q.new_variable();
        q.set_lower_bound(s, 0.0).unwrap();

        let mut eq = Equation::new(EquationKind::Eq);
        eq.add_addend(1.0, out).add_addend(1.0, s).set_scalar(0.0);
        q.add_equation(eq).unwrap();

        let encoded = encode(&q).unwrap();
        let (outcome, _) = solver.solve(&encoded, None).unwrap();
        assert!(outcome.is_unsat());
    }
}
