//! Core types for sigmoid-network verification queries.
//!
//! This crate provides the foundational vocabulary shared by the graph
//! loader, the query encoder, and the experiment driver: variable
//! identifiers, bounds, linear equations, solver assignments, and solver
//! statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a solver variable.
///
/// Variables are numbered densely from zero: network inputs first, then the
/// internal pre/post-activation variables, then any free variables allocated
/// on top of the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VarId(pub usize);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x_{}", self.0)
    }
}

/// A bound on a scalar value: [lower, upper].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    /// Create a new bound.
    #[inline]
    pub fn new(lower: f64, upper: f64) -> Self {
        debug_assert!(lower <= upper, "Invalid bound: {lower} > {upper}");
        Self { lower, upper }
    }

    /// Create a concrete (point) bound.
    #[inline]
    pub fn concrete(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// Check if this bound contains a value.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Width of the bound interval.
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Check if bounds have exploded to infinity.
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.lower.is_infinite() || self.upper.is_infinite()
    }

    /// Intersect two bounds.
    #[inline]
    pub fn intersect(&self, other: &Bound) -> Option<Bound> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        if lower <= upper {
            Some(Bound { lower, upper })
        } else {
            None
        }
    }

    /// Union of two bounds (convex hull).
    #[inline]
    pub fn union(&self, other: &Bound) -> Bound {
        Bound {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }
}

impl From<RangeInclusive<f64>> for Bound {
    fn from(range: RangeInclusive<f64>) -> Self {
        Self::new(*range.start(), *range.end())
    }
}

/// Relation of a linear equation to its scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquationKind {
    /// Weighted sum equals the scalar.
    Eq,
    /// Weighted sum is at least the scalar.
    Ge,
    /// Weighted sum is at most the scalar.
    Le,
}

/// A linear constraint over weighted variables: `sum(c_i * x_i) <op> scalar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub kind: EquationKind,
    pub addends: Vec<(f64, VarId)>,
    pub scalar: f64,
}

impl Equation {
    pub fn new(kind: EquationKind) -> Self {
        Self {
            kind,
            addends: Vec::new(),
            scalar: 0.0,
        }
    }

    /// Append a weighted variable to the left-hand side.
    pub fn add_addend(&mut self, coefficient: f64, var: VarId) -> &mut Self {
        self.addends.push((coefficient, var));
        self
    }

    /// Set the right-hand-side scalar.
    pub fn set_scalar(&mut self, scalar: f64) -> &mut Self {
        self.scalar = scalar;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.addends.is_empty()
    }
}

/// A satisfying assignment returned by the solver.
///
/// Maps every query variable to a concrete value. An empty assignment never
/// comes out of a satisfiable solve; [`SolveOutcome::Unsat`] is used instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    values: BTreeMap<VarId, f64>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, var: VarId, value: f64) {
        self.values.insert(var, value);
    }

    pub fn get(&self, var: VarId) -> Option<f64> {
        self.values.get(&var).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.values.iter().map(|(&v, &x)| (v, x))
    }
}

impl FromIterator<(VarId, f64)> for Assignment {
    fn from_iter<T: IntoIterator<Item = (VarId, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Assignment:")?;
        for (var, value) in &self.values {
            writeln!(f, "  {} = {}", var, value)?;
        }
        Ok(())
    }
}

/// Statistics reported for one solve call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveStats {
    /// Case splits performed by the solver, when it reports them.
    pub num_splits: u64,
    /// Piecewise-linear constraints whose phase was not fixed by bounds.
    pub num_active_pl_constraints: usize,
    /// Total piecewise-linear constraints in the query.
    pub num_pl_constraints: usize,
    /// Linear inequalities introduced by activation abstraction.
    pub num_abstracted_equations: usize,
    /// Wall-clock time of the solve call.
    #[serde(with = "duration_millis")]
    pub total_time: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Result of a solve call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolveOutcome {
    /// A satisfying assignment over all query variables.
    Sat(Assignment),
    /// The constraint system has no solution.
    Unsat,
}

impl SolveOutcome {
    pub fn is_sat(&self) -> bool {
        matches!(self, SolveOutcome::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, SolveOutcome::Unsat)
    }

    /// Get the assignment if satisfiable.
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            SolveOutcome::Sat(a) => Some(a),
            SolveOutcome::Unsat => None,
        }
    }
}

/// Errors across the verification pipeline.
#[derive(Debug, Error)]
pub enum SigmaError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("solver not found: {0}")]
    SolverNotFound(String),

    #[error("solver execution failed: {0}")]
    SolverExecution(String),

    #[error("solver returned unknown: {0}")]
    SolverUnknown(String),

    #[error("solver timed out after {0:?}")]
    SolverTimeout(Duration),

    #[error("failed to parse solver model: {0}")]
    ModelParse(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SigmaError {
    /// Wrap an io error with a human-readable context line.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SigmaError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SigmaError>;
