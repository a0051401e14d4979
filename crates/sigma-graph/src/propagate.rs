//! Interval propagation through a frozen graph.
//!
//! Computes sound pre- and post-activation bounds per layer from an input
//! box. The query encoder uses the pre-activation intervals to decide which
//! sigmoid constraints are phase-fixed and to place its linear abstraction.

use crate::{Activation, FrozenGraph};
use sigma_core::{Bound, Result, SigmaError};
use tracing::debug;

/// The logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of the logistic function at `x`.
#[inline]
pub fn sigmoid_derivative(x: f64) -> f64 {
    let s = sigmoid(x);
    s * (1.0 - s)
}

/// Per-layer interval bounds from one propagation pass.
#[derive(Debug, Clone)]
pub struct LayerBounds {
    /// Bounds on each layer's affine output, before activation.
    pub pre: Vec<Vec<Bound>>,
    /// Bounds after activation; equals `pre` for identity layers.
    pub post: Vec<Vec<Bound>>,
}

impl LayerBounds {
    /// Bounds on the network output (last layer, post-activation).
    pub fn output(&self) -> &[Bound] {
        self.post.last().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl FrozenGraph {
    /// Propagate an input box through the graph.
    ///
    /// Sound with respect to [`FrozenGraph::evaluate`]: for any input inside
    /// the box, every intermediate value falls inside the returned interval.
    pub fn propagate(&self, input: &[Bound]) -> Result<LayerBounds> {
        if input.len() != self.input_dim() {
            return Err(SigmaError::InvalidQuery(format!(
                "input box has {} intervals, graph expects {}",
                input.len(),
                self.input_dim()
            )));
        }

        let mut pre = Vec::with_capacity(self.layers.len());
        let mut post = Vec::with_capacity(self.layers.len());
        let mut current: Vec<Bound> = input.to_vec();

        for layer in &self.layers {
            let mut layer_pre = Vec::with_capacity(layer.output_dim());
            for (row, &b) in layer.weights.iter().zip(layer.bias.iter()) {
                let mut lo = b;
                let mut hi = b;
                for (&w, bound) in row.iter().zip(current.iter()) {
                    if w >= 0.0 {
                        lo += w * bound.lower;
                        hi += w * bound.upper;
                    } else {
                        lo += w * bound.upper;
                        hi += w * bound.lower;
                    }
                }
                layer_pre.push(Bound::new(lo, hi));
            }

            let layer_post: Vec<Bound> = match layer.activation {
                // Sigmoid is monotone, so the interval maps endpoint-wise.
                Activation::Sigmoid => layer_pre
                    .iter()
                    .map(|b| Bound::new(sigmoid(b.lower), sigmoid(b.upper)))
                    .collect(),
                Activation::Identity => layer_pre.clone(),
            };

            current = layer_post.clone();
            pre.push(layer_pre);
            post.push(layer_post);
        }

        debug!(
            layers = pre.len(),
            output_width = current.len(),
            "propagated input box"
        );
        Ok(LayerBounds { pre, post })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_graphs;

    #[test]
    fn test_sigmoid_values() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(10.0) > 0.9999);
        assert!(sigmoid(-10.0) < 0.0001);
        // Symmetry around the inflection point.
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_derivative_peak_at_zero() {
        assert!((sigmoid_derivative(0.0) - 0.25).abs() < 1e-12);
        assert!(sigmoid_derivative(3.0) < 0.25);
        assert!(sigmoid_derivative(-3.0) < 0.25);
        assert!((sigmoid_derivative(3.0) - sigmoid_derivative(-3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_propagate_point_box_matches_evaluate() {
        let g = test_graphs::small();
        let x = [0.3, -0.7];
        let box_in: Vec<Bound> = x.iter().map(|&v| Bound::concrete(v)).collect();

        let bounds = g.propagate(&box_in).unwrap();
        let out = g.evaluate(&x).unwrap();

        for (b, v) in bounds.output().iter().zip(out.iter()) {
            assert!(b.width() < 1e-12);
            assert!((b.lower - v).abs() < 1e-9, "{} not at {}", v, b.lower);
        }
    }

    #[test]
    fn test_propagate_soundness_on_grid() {
        let g = test_graphs::small();
        let box_in = vec![Bound::new(-0.5, 0.5), Bound::new(-0.5, 0.5)];
        let bounds = g.propagate(&box_in).unwrap();

        for i in 0..=10 {
            for j in 0..=10 {
                let x = [-0.5 + 0.1 * i as f64, -0.5 + 0.1 * j as f64];
                let out = g.evaluate(&x).unwrap();
                for (b, v) in bounds.output().iter().zip(out.iter()) {
                    assert!(
                        b.contains(*v),
                        "output {} outside [{}, {}] for input {:?}",
                        v,
                        b.lower,
                        b.upper,
                        x
                    );
                }
            }
        }
    }

    #[test]
    fn test_propagate_sigmoid_post_in_unit_interval() {
        let g = test_graphs::small();
        let box_in = vec![Bound::new(-100.0, 100.0), Bound::new(-100.0, 100.0)];
        let bounds = g.propagate(&box_in).unwrap();

        for b in &bounds.post[0] {
            assert!(b.lower >= 0.0 && b.upper <= 1.0);
        }
    }

    #[test]
    fn test_propagate_pre_and_post_shapes() {
        let g = test_graphs::small();
        let box_in = vec![Bound::new(0.0, 1.0); 2];
        let bounds = g.propagate(&box_in).unwrap();

        assert_eq!(bounds.pre.len(), 2);
        assert_eq!(bounds.post.len(), 2);
        assert_eq!(bounds.pre[0].len(), 2);
        assert_eq!(bounds.post[1].len(), 2);
        // Identity output layer keeps pre == post.
        assert_eq!(bounds.pre[1], bounds.post[1]);
    }

    #[test]
    fn test_propagate_rejects_wrong_box_len() {
        let g = test_graphs::small();
        let err = g.propagate(&[Bound::new(0.0, 1.0)]).unwrap_err();
        assert!(matches!(err, SigmaError::InvalidQuery(_)));
    }
}
