//! Verification queries over frozen graphs, solved by an external SMT solver.
//!
//! The workflow mirrors the narrow interface a query script needs:
//!
//! 1. Build a [`Query`] over a loaded [`sigma_graph::FrozenGraph`]. The query
//!    exposes input/output variable identifiers, accepts bounds on any
//!    variable, hands out fresh free variables, and collects linear
//!    side-equations.
//! 2. [`encode`] the query into a QF_LRA formula. Sigmoid neurons become
//!    piecewise-linear abstractions placed using interval propagation.
//! 3. Hand the encoded formula to a [`Solver`], typically an
//!    [`ExternalSolver`] subprocess, and get back a [`SolveOutcome`] with
//!    [`SolveStats`].
//!
//! Everything inside the solve call is an opaque black box; this crate only
//! frames the problem and reads the answer back.

mod encoder;
mod model_parser;
mod process;
mod query;

pub use encoder::{encode, EncodeStats, Encoded};
pub use model_parser::parse_assignment;
pub use process::{ExternalSolver, Solver, SolverConfig};
pub use query::Query;

pub use sigma_core::{SolveOutcome, SolveStats};
