//! Frozen-graph loading and analysis.
//!
//! A frozen graph is a trained feedforward network with fixed weights,
//! serialized as JSON (optionally gzip-compressed). This crate loads such
//! graphs, validates their shapes, evaluates them on concrete inputs, and
//! propagates interval bounds through them.

mod io;
mod propagate;

pub use propagate::{sigmoid, sigmoid_derivative, LayerBounds};

use serde::{Deserialize, Serialize};
use sigma_core::{Result, SigmaError};
use std::path::Path;
use tracing::debug;

/// Activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    /// No activation; the layer output is the affine map itself.
    Identity,
}

/// One dense layer: `y = act(W x + b)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Weight matrix, one row per output neuron.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

impl LayerSpec {
    pub fn input_dim(&self) -> usize {
        self.weights.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.weights.len()
    }
}

/// A loaded frozen network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenGraph {
    #[serde(default)]
    pub name: String,
    pub layers: Vec<LayerSpec>,
}

impl FrozenGraph {
    /// Load a frozen graph from a JSON or gzipped-JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = io::read_model_text(path)?;
        let graph: FrozenGraph = serde_json::from_str(&text)
            .map_err(|e| SigmaError::ModelLoad(format!("malformed graph JSON: {}", e)))?;
        graph.validate()?;
        debug!(
            name = %graph.name,
            layers = graph.layers.len(),
            inputs = graph.input_dim(),
            outputs = graph.output_dim(),
            "loaded frozen graph from {}",
            path.display()
        );
        Ok(graph)
    }

    /// Check layer shapes: consistent weight rows, matching bias lengths,
    /// and each layer consuming exactly the previous layer's width.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(SigmaError::ModelLoad("graph has no layers".to_string()));
        }

        let mut width = self.input_dim();
        if width == 0 {
            return Err(SigmaError::ModelLoad(
                "first layer has no input columns".to_string(),
            ));
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() {
                return Err(SigmaError::ModelLoad(format!(
                    "layer {} has no output rows",
                    idx
                )));
            }
            for (row_idx, row) in layer.weights.iter().enumerate() {
                if row.len() != width {
                    return Err(SigmaError::ModelLoad(format!(
                        "layer {} row {} has {} columns, expected {}",
                        idx,
                        row_idx,
                        row.len(),
                        width
                    )));
                }
            }
            if layer.bias.len() != layer.output_dim() {
                return Err(SigmaError::ModelLoad(format!(
                    "layer {} has {} bias entries for {} rows",
                    idx,
                    layer.bias.len(),
                    layer.output_dim()
                )));
            }
            width = layer.output_dim();
        }

        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.input_dim()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.output_dim()).unwrap_or(0)
    }

    /// Number of sigmoid neurons across all layers.
    pub fn num_sigmoids(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.activation == Activation::Sigmoid)
            .map(|l| l.output_dim())
            .sum()
    }

    /// Concrete forward pass.
    pub fn evaluate(&self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() != self.input_dim() {
            return Err(SigmaError::InvalidQuery(format!(
                "input has {} values, graph expects {}",
                input.len(),
                self.input_dim()
            )));
        }

        let mut current = input.to_vec();
        for layer in &self.layers {
            let mut next = Vec::with_capacity(layer.output_dim());
            for (row, &b) in layer.weights.iter().zip(layer.bias.iter()) {
                let pre: f64 = row.iter().zip(current.iter()).map(|(w, x)| w * x).sum::<f64>() + b;
                next.push(match layer.activation {
                    Activation::Sigmoid => sigmoid(pre),
                    Activation::Identity => pre,
                });
            }
            current = next;
        }
        Ok(current)
    }
}
