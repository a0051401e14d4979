//! Query to SMT formula encoder.
//!
//! Produces QF_LRA formulas: dense layers become linear equalities, sigmoid
//! neurons become piecewise-linear abstractions placed using the interval
//! bounds from [`sigma_graph::FrozenGraph::propagate`].
//!
//! A sigmoid neuron whose pre-activation interval stays on one side of zero
//! is phase-fixed (the function is purely convex or purely concave there) and
//! gets a secant/tangent triple. A neuron whose interval crosses zero is
//! active and gets the sound parallel-line relaxation with slope
//! `min(sigmoid'(l), sigmoid'(u))`.

use crate::query::Query;
use sigma_core::{Bound, EquationKind, Result, VarId};
use sigma_graph::{sigmoid, sigmoid_derivative, Activation};
use tracing::debug;

/// Pre-activation intervals narrower than this are treated as concrete.
const CONCRETE_WIDTH: f64 = 1e-9;

/// Coefficients smaller than this are dropped from linear combinations.
const COEFF_EPSILON: f64 = 1e-15;

/// Encoder-side facts about the produced abstraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Sigmoid neurons in the query.
    pub num_pl_constraints: usize,
    /// Sigmoid neurons whose pre-activation interval crosses zero.
    pub num_active_pl_constraints: usize,
    /// Linear constraints introduced to abstract sigmoid neurons.
    pub num_abstracted_equations: usize,
}

/// An encoded query, ready to hand to a solver.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// SMT-LIB2 formula text, ending in `(check-sat)` and `(get-model)`.
    pub formula: String,
    /// Number of declared query variables.
    pub num_vars: usize,
    pub stats: EncodeStats,
}

struct Encoder {
    declarations: Vec<String>,
    constraints: Vec<String>,
    stats: EncodeStats,
}

impl Encoder {
    fn new() -> Self {
        Self {
            declarations: Vec::new(),
            constraints: Vec::new(),
            stats: EncodeStats::default(),
        }
    }

    fn declare_real(&mut self, var: VarId) {
        self.declarations
            .push(format!("(declare-const {} Real)", var));
    }

    fn assert(&mut self, constraint: String) {
        self.constraints.push(format!("(assert {})", constraint));
    }

    /// Encode `y = sum(w_j * x_j) + b` for one neuron.
    fn assert_affine(&mut self, out: VarId, inputs: &[VarId], weights: &[f64], bias: f64) {
        let mut terms = Vec::new();
        for (&w, &x) in weights.iter().zip(inputs.iter()) {
            if w.abs() > COEFF_EPSILON {
                terms.push(format!("(* {} {})", fmt_real(w), x));
            }
        }
        if bias.abs() > COEFF_EPSILON {
            terms.push(fmt_real(bias));
        }

        let rhs = match terms.len() {
            0 => "0.0".to_string(),
            1 => terms.pop().unwrap(),
            _ => format!("(+ {})", terms.join(" ")),
        };
        self.assert(format!("(= {} {})", out, rhs));
    }

    /// Constrain `f` above or below the line through `(x0, y0)` with the
    /// given slope, as a function of `b`.
    fn assert_line(&mut self, f: VarId, b: VarId, slope: f64, x0: f64, y0: f64, upper: bool) {
        let intercept = y0 - slope * x0;
        let line = if slope.abs() > COEFF_EPSILON {
            format!("(+ (* {} {}) {})", fmt_real(slope), b, fmt_real(intercept))
        } else {
            fmt_real(intercept)
        };
        let op = if upper { "<=" } else { ">=" };
        self.assert(format!("({} {} {})", op, f, line));
        self.stats.num_abstracted_equations += 1;
    }

    /// Abstract `f = sigmoid(b)` over the pre-activation interval.
    fn assert_sigmoid(&mut self, b: VarId, f: VarId, interval: Bound) {
        self.stats.num_pl_constraints += 1;

        let (l, u) = (interval.lower, interval.upper);
        let (sl, su) = (sigmoid(l), sigmoid(u));

        if interval.width() < CONCRETE_WIDTH {
            self.assert(format!("(= {} {})", f, fmt_real(sigmoid(0.5 * (l + u)))));
            self.stats.num_abstracted_equations += 1;
            return;
        }

        // Monotonicity pins the output range regardless of phase.
        self.assert(format!("(>= {} {})", f, fmt_real(sl)));
        self.assert(format!("(<= {} {})", f, fmt_real(su)));

        let secant = (su - sl) / (u - l);
        if u <= 0.0 {
            // Convex region: secant above, endpoint tangents below.
            self.assert_line(f, b, secant, l, sl, true);
            self.assert_line(f, b, sigmoid_derivative(l), l, sl, false);
            self.assert_line(f, b, sigmoid_derivative(u), u, su, false);
        } else if l >= 0.0 {
            // Concave region: secant below, endpoint tangents above.
            self.assert_line(f, b, secant, l, sl, false);
            self.assert_line(f, b, sigmoid_derivative(l), l, sl, true);
            self.assert_line(f, b, sigmoid_derivative(u), u, su, true);
        } else {
            // Interval crosses the inflection point. Parallel lines with the
            // smaller endpoint slope stay sound on both sides.
            self.stats.num_active_pl_constraints += 1;
            let slope = sigmoid_derivative(l).min(sigmoid_derivative(u));
            self.assert_line(f, b, slope, l, sl, false);
            self.assert_line(f, b, slope, u, su, true);
        }
    }

    fn into_formula(self, num_vars: usize) -> Encoded {
        let mut formula = String::from("(set-option :produce-models true)\n(set-logic QF_LRA)\n");
        for decl in &self.declarations {
            formula.push_str(decl);
            formula.push('\n');
        }
        for constraint in &self.constraints {
            formula.push_str(constraint);
            formula.push('\n');
        }
        formula.push_str("(check-sat)\n(get-model)\n");

        Encoded {
            formula,
            num_vars,
            stats: self.stats,
        }
    }
}

/// Encode a query into a QF_LRA formula.
pub fn encode(query: &Query<'_>) -> Result<Encoded> {
    let graph = query.graph();
    let input_box = query.input_box()?;
    let layer_bounds = graph.propagate(&input_box)?;

    let mut enc = Encoder::new();

    for idx in 0..query.num_variables() {
        enc.declare_real(VarId(idx));
    }

    for (var, lower, upper) in query.explicit_bounds() {
        if let Some(lo) = lower {
            enc.assert(format!("(>= {} {})", var, fmt_real(lo)));
        }
        if let Some(up) = upper {
            enc.assert(format!("(<= {} {})", var, fmt_real(up)));
        }
    }

    let mut prev_post: Vec<VarId> = query.input_variables().to_vec();
    for (layer_idx, layer) in graph.layers.iter().enumerate() {
        let pre = query.layer_pre_variables(layer_idx).to_vec();
        let post = query.layer_post_variables(layer_idx).to_vec();

        for (neuron, (row, &bias)) in layer.weights.iter().zip(layer.bias.iter()).enumerate() {
            enc.assert_affine(pre[neuron], &prev_post, row, bias);
        }

        if layer.activation == Activation::Sigmoid {
            for neuron in 0..layer.output_dim() {
                enc.assert_sigmoid(
                    pre[neuron],
                    post[neuron],
                    layer_bounds.pre[layer_idx][neuron],
                );
            }
        }

        prev_post = post;
    }

    for equation in query.equations() {
        let terms: Vec<String> = equation
            .addends
            .iter()
            .map(|&(c, v)| format!("(* {} {})", fmt_real(c), v))
            .collect();
        let lhs = if terms.len() == 1 {
            terms[0].clone()
        } else {
            format!("(+ {})", terms.join(" "))
        };
        let op = match equation.kind {
            EquationKind::Eq => "=",
            EquationKind::Ge => ">=",
            EquationKind::Le => "<=",
        };
        enc.assert(format!("({} {} {})", op, lhs, fmt_real(equation.scalar)));
    }

    let encoded = enc.into_formula(query.num_variables());
    debug!(
        vars = encoded.num_vars,
        pl = encoded.stats.num_pl_constraints,
        active = encoded.stats.num_active_pl_constraints,
        abstracted = encoded.stats.num_abstracted_equations,
        formula_bytes = encoded.formula.len(),
        "encoded query"
    );
    Ok(encoded)
}

/// Format an f64 as an SMT-LIB Real literal.
///
/// Negative values use the prefix minus form and integral values keep one
/// decimal place so the literal stays a Real.
fn fmt_real(value: f64) -> String {
    let v = if value == 0.0 { 0.0 } else { value };
    if v < 0.0 {
        format!("(- {})", fmt_magnitude(-v))
    } else {
        fmt_magnitude(v)
    }
}

fn fmt_magnitude(v: f64) -> String {
    debug_assert!(v >= 0.0);
    if v.fract() == 0.0 && v < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}
