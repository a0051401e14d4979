//! Building and solving one robustness query.
//!
//! The query asks whether, inside an input box around a fixed sample, the
//! network can rank the runner-up class at least as high as the target
//! class. A fresh slack variable `s >= 0` and the side-equation
//! `out[target] - out[runner_up] + s = 0` express the question; SAT means an
//! adversarial assignment exists under the solver's abstraction, UNSAT means
//! the margin holds.

use sigma_core::{Equation, EquationKind, Result, SigmaError, SolveOutcome, SolveStats, VarId};
use sigma_graph::FrozenGraph;
use sigma_smt::{encode, Query, Solver};
use std::path::Path;
use tracing::debug;

/// Parameters of one robustness query.
#[derive(Debug, Clone, Copy)]
pub struct RobustnessSpec {
    /// Perturbation radius around the sample, per pixel.
    pub delta: f64,
    /// Class expected to win.
    pub target: usize,
    /// Class challenged against the target.
    pub runner_up: usize,
    /// Symmetric bound asserted on every raw output.
    pub output_bound: f64,
}

/// Outcome of one robustness query, with the variable identifiers needed to
/// read the assignment back.
#[derive(Debug)]
pub struct RobustnessOutcome {
    pub outcome: SolveOutcome,
    pub stats: SolveStats,
    pub input_vars: Vec<VarId>,
    pub output_vars: Vec<VarId>,
}

/// Pose and solve a robustness query over `graph` around `sample`.
pub fn solve_robustness(
    graph: &FrozenGraph,
    sample: &[f64],
    spec: &RobustnessSpec,
    solver: &dyn Solver,
    log_path: Option<&Path>,
) -> Result<RobustnessOutcome> {
    let mut query = Query::new(graph);

    let input_vars = query.input_variables().to_vec();
    if sample.len() != input_vars.len() {
        return Err(SigmaError::InvalidQuery(format!(
            "sample has {} values, network has {} inputs",
            sample.len(),
            input_vars.len()
        )));
    }

    let output_vars = query.output_variables().to_vec();
    let num_outputs = output_vars.len();
    if spec.target >= num_outputs || spec.runner_up >= num_outputs {
        return Err(SigmaError::InvalidQuery(format!(
            "classes {} and {} out of range for {} outputs",
            spec.target, spec.runner_up, num_outputs
        )));
    }
    if spec.target == spec.runner_up {
        return Err(SigmaError::InvalidQuery(
            "target and runner-up classes must differ".to_string(),
        ));
    }

    for &var in &output_vars {
        query.set_lower_bound(var, -spec.output_bound)?;
        query.set_upper_bound(var, spec.output_bound)?;
    }

    for (&var, &pixel) in input_vars.iter().zip(sample.iter()) {
        query.set_lower_bound(var, pixel - spec.delta)?;
        query.set_upper_bound(var, pixel + spec.delta)?;
    }

    let slack = query.new_variable();
    query.set_lower_bound(slack, 0.0)?;

    let mut equation = Equation::new(EquationKind::Eq);
    equation
        .add_addend(1.0, output_vars[spec.target])
        .add_addend(-1.0, output_vars[spec.runner_up])
        .add_addend(1.0, slack);
    equation.set_scalar(0.0);
    query.add_equation(equation)?;

    let encoded = encode(&query)?;
    debug!(
        delta = spec.delta,
        target = spec.target,
        runner_up = spec.runner_up,
        vars = encoded.num_vars,
        "solving robustness query"
    );
    let (outcome, stats) = solver.solve(&encoded, log_path)?;

    Ok(RobustnessOutcome {
        outcome,
        stats,
        input_vars,
        output_vars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigma_core::Assignment;
    use sigma_graph::{Activation, LayerSpec};
    use sigma_smt::Encoded;

    fn two_class_graph() -> FrozenGraph {
        FrozenGraph {
            name: "two-class".to_string(),
            layers: vec![
                LayerSpec {
                    weights: vec![vec![1.0, -1.0], vec![0.5, 0.5]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Sigmoid,
                },
                LayerSpec {
                    weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Identity,
                },
            ],
        }
    }

    /// Records the encoded query instead of solving it.
    struct CapturingSolver {
        outcome: SolveOutcome,
        captured: std::cell::RefCell<Option<Encoded>>,
    }

    impl CapturingSolver {
        fn unsat() -> Self {
            Self {
                outcome: SolveOutcome::Unsat,
                captured: std::cell::RefCell::new(None),
            }
        }
    }

    impl Solver for CapturingSolver {
        fn solve(
            &self,
            encoded: &Encoded,
            _log_path: Option<&Path>,
        ) -> Result<(SolveOutcome, SolveStats)> {
            *self.captured.borrow_mut() = Some(encoded.clone());
            let stats = SolveStats {
                num_pl_constraints: encoded.stats.num_pl_constraints,
                num_active_pl_constraints: encoded.stats.num_active_pl_constraints,
                num_abstracted_equations: encoded.stats.num_abstracted_equations,
                ..Default::default()
            };
            Ok((self.outcome.clone(), stats))
        }
    }

    fn spec(delta: f64) -> RobustnessSpec {
        RobustnessSpec {
            delta,
            target: 0,
            runner_up: 1,
            output_bound: 100.0,
        }
    }

    #[test]
    fn test_query_shape_reaches_solver() {
        let graph = two_class_graph();
        let solver = CapturingSolver::unsat();
        let result =
            solve_robustness(&graph, &[0.5, 0.5], &spec(0.25), &solver, None).unwrap();

        assert!(result.outcome.is_unsat());
        assert_eq!(result.input_vars.len(), 2);
        assert_eq!(result.output_vars.len(), 2);
        assert_eq!(result.stats.num_pl_constraints, 2);

        let encoded = solver.captured.borrow().clone().unwrap();
        // Inputs, 2 pre + 2 post sigmoid, 2 identity outputs, 1 slack.
        assert_eq!(encoded.num_vars, 9);
        // Input box around the sample.
        assert!(encoded.formula.contains("(assert (>= x_0 0.25))"));
        assert!(encoded.formula.contains("(assert (<= x_0 0.75))"));
        // Output bounds and the slack-margin equation.
        assert!(encoded.formula.contains("(assert (>= x_6 (- 100.0)))"));
        assert!(encoded.formula.contains("(assert (<= x_6 100.0))"));
        assert!(encoded.formula.contains("(assert (>= x_8 0.0))"));
        assert!(encoded
            .formula
            .contains("(assert (= (+ (* 1.0 x_6) (* (- 1.0) x_7) (* 1.0 x_8)) 0.0))"));
    }

    #[test]
    fn test_rejects_sample_length_mismatch() {
        let graph = two_class_graph();
        let solver = CapturingSolver::unsat();
        let err = solve_robustness(&graph, &[0.5], &spec(0.1), &solver, None).unwrap_err();
        assert!(matches!(err, SigmaError::InvalidQuery(_)));
    }

    #[test]
    fn test_rejects_class_out_of_range() {
        let graph = two_class_graph();
        let solver = CapturingSolver::unsat();
        let bad = RobustnessSpec {
            target: 7,
            ..spec(0.1)
        };
        let err = solve_robustness(&graph, &[0.5, 0.5], &bad, &solver, None).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_rejects_equal_classes() {
        let graph = two_class_graph();
        let solver = CapturingSolver::unsat();
        let bad = RobustnessSpec {
            runner_up: 0,
            ..spec(0.1)
        };
        let err = solve_robustness(&graph, &[0.5, 0.5], &bad, &solver, None).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_sat_outcome_passes_through() {
        let graph = two_class_graph();
        let assignment: Assignment = (0..9).map(|i| (VarId(i), 0.0)).collect();
        let solver = CapturingSolver {
            outcome: SolveOutcome::Sat(assignment),
            captured: std::cell::RefCell::new(None),
        };
        let result =
            solve_robustness(&graph, &[0.5, 0.5], &spec(0.01), &solver, None).unwrap();
        assert!(result.outcome.is_sat());
    }
}
