//! Query construction over a loaded frozen graph.
//!
//! Variable numbering is dense: input variables first, then for each layer a
//! pre-activation variable per neuron, then a post-activation variable per
//! sigmoid neuron (identity layers reuse the pre-activation variable). Free
//! variables allocated with [`Query::new_variable`] come after all network
//! variables.

use sigma_core::{Bound, Equation, Result, SigmaError, VarId};
use sigma_graph::{Activation, FrozenGraph};
use std::collections::BTreeMap;

/// A verification query: a network plus bounds, free variables, and linear
/// side-equations.
#[derive(Debug, Clone)]
pub struct Query<'g> {
    graph: &'g FrozenGraph,
    input_vars: Vec<VarId>,
    /// Pre-activation variables, per layer.
    pre_vars: Vec<Vec<VarId>>,
    /// Post-activation variables, per layer.
    post_vars: Vec<Vec<VarId>>,
    lower: BTreeMap<VarId, f64>,
    upper: BTreeMap<VarId, f64>,
    equations: Vec<Equation>,
    next_var: usize,
}

impl<'g> Query<'g> {
    /// Allocate variables for every input and every neuron of the graph.
    pub fn new(graph: &'g FrozenGraph) -> Self {
        let mut next_var = 0usize;
        let mut fresh = |n: usize| {
            let vars: Vec<VarId> = (next_var..next_var + n).map(VarId).collect();
            next_var += n;
            vars
        };

        let input_vars = fresh(graph.input_dim());
        let mut pre_vars = Vec::with_capacity(graph.layers.len());
        let mut post_vars = Vec::with_capacity(graph.layers.len());
        for layer in &graph.layers {
            let pre = fresh(layer.output_dim());
            let post = match layer.activation {
                Activation::Sigmoid => fresh(layer.output_dim()),
                Activation::Identity => pre.clone(),
            };
            pre_vars.push(pre);
            post_vars.push(post);
        }

        Self {
            graph,
            input_vars,
            pre_vars,
            post_vars,
            lower: BTreeMap::new(),
            upper: BTreeMap::new(),
            equations: Vec::new(),
            next_var,
        }
    }

    pub fn graph(&self) -> &FrozenGraph {
        self.graph
    }

    /// Input variable identifiers, in sample order.
    pub fn input_variables(&self) -> &[VarId] {
        &self.input_vars
    }

    /// Output variable identifiers (last layer, post-activation).
    pub fn output_variables(&self) -> &[VarId] {
        self.post_vars.last().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn layer_pre_variables(&self, layer: usize) -> &[VarId] {
        &self.pre_vars[layer]
    }

    pub(crate) fn layer_post_variables(&self, layer: usize) -> &[VarId] {
        &self.post_vars[layer]
    }

    /// Total number of allocated variables, free variables included.
    pub fn num_variables(&self) -> usize {
        self.next_var
    }

    /// Allocate a fresh free variable.
    pub fn new_variable(&mut self) -> VarId {
        let var = VarId(self.next_var);
        self.next_var += 1;
        var
    }

    pub fn set_lower_bound(&mut self, var: VarId, value: f64) -> Result<()> {
        self.check_var(var)?;
        self.lower.insert(var, value);
        Ok(())
    }

    pub fn set_upper_bound(&mut self, var: VarId, value: f64) -> Result<()> {
        self.check_var(var)?;
        self.upper.insert(var, value);
        Ok(())
    }

    pub fn lower_bound(&self, var: VarId) -> Option<f64> {
        self.lower.get(&var).copied()
    }

    pub fn upper_bound(&self, var: VarId) -> Option<f64> {
        self.upper.get(&var).copied()
    }

    /// Add a linear side-equation over query variables.
    pub fn add_equation(&mut self, equation: Equation) -> Result<()> {
        if equation.is_empty() {
            return Err(SigmaError::InvalidQuery(
                "equation has no addends".to_string(),
            ));
        }
        for &(_, var) in &equation.addends {
            self.check_var(var)?;
        }
        self.equations.push(equation);
        Ok(())
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Bounds explicitly set on variables, as (var, lower, upper) options.
    pub(crate) fn explicit_bounds(&self) -> impl Iterator<Item = (VarId, Option<f64>, Option<f64>)> + '_ {
        let vars: std::collections::BTreeSet<VarId> = self
            .lower
            .keys()
            .chain(self.upper.keys())
            .copied()
            .collect();
        vars.into_iter().map(move |v| {
            (
                v,
                self.lower.get(&v).copied(),
                self.upper.get(&v).copied(),
            )
        })
    }

    /// The input box from explicit input bounds. Every input variable must
    /// carry both bounds before a query can be encoded.
    pub(crate) fn input_box(&self) -> Result<Vec<Bound>> {
        self.input_vars
            .iter()
            .map(|&v| {
                let lower = self.lower.get(&v).copied().ok_or_else(|| {
                    SigmaError::InvalidQuery(format!("input {} has no lower bound", v))
                })?;
                let upper = self.upper.get(&v).copied().ok_or_else(|| {
                    SigmaError::InvalidQuery(format!("input {} has no upper bound", v))
                })?;
                if lower > upper {
                    return Err(SigmaError::InvalidQuery(format!(
                        "input {} has empty bound [{}, {}]",
                        v, lower, upper
                    )));
                }
                Ok(Bound::new(lower, upper))
            })
            .collect()
    }

    fn check_var(&self, var: VarId) -> Result<()> {
        if var.index() >= self.next_var {
            return Err(SigmaError::InvalidQuery(format!(
                "unknown variable {} (only {} allocated)",
                var, self.next_var
            )));
        }
        Ok(())
    }
}
