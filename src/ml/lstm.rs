//! Recurrent state and the LSTM cell update
//!
//! Gates follow the stacked `(input, forget, cell, output)` layout of the
//! exported weights. The input projection `W_ih x + b_ih` is computed by the
//! caller so that it can be batched across frames; only the recurrent half
//! runs step by step.

use crate::ml::ops::{linear_into, sigmoid};
use crate::ml::params::{EmissionShape, LstmLayerParams};

/// Hidden and cell state of the whole recurrent stack
///
/// Each tensor is `[num_layers, hidden_size]`, row-major. A state belongs to
/// exactly one tracking session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    /// Hidden state `h`
    pub hidden: Vec<f32>,
    /// Cell state `c`
    pub cell: Vec<f32>,
    num_layers: usize,
    hidden_size: usize,
}

impl RecurrentState {
    /// All-zero state
    pub fn zeros(num_layers: usize, hidden_size: usize) -> Self {
        Self {
            hidden: vec![0.0; num_layers * hidden_size],
            cell: vec![0.0; num_layers * hidden_size],
            num_layers,
            hidden_size,
        }
    }

    /// All-zero state sized for a model shape
    pub fn for_shape(shape: &EmissionShape) -> Self {
        Self::zeros(shape.num_layers, shape.hidden_size)
    }

    /// Zero both tensors
    pub fn reset(&mut self) {
        self.hidden.fill(0.0);
        self.cell.fill(0.0);
    }

    /// Number of stacked layers
    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Units per layer
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Hidden output of the top layer
    pub fn top_hidden(&self) -> &[f32] {
        &self.hidden[(self.num_layers - 1) * self.hidden_size..]
    }

    /// Hidden row of one layer
    pub fn layer_hidden(&self, layer: usize) -> &[f32] {
        &self.hidden[layer * self.hidden_size..(layer + 1) * self.hidden_size]
    }

    /// Mutable `(hidden, cell)` rows of one layer
    pub(crate) fn layer_mut(&mut self, layer: usize) -> (&mut [f32], &mut [f32]) {
        let range = layer * self.hidden_size..(layer + 1) * self.hidden_size;
        (&mut self.hidden[range.clone()], &mut self.cell[range])
    }
}

/// Advance one layer by one step
///
/// * `input_gates` - precomputed `W_ih x + b_ih`, length `4 * hidden`
/// * `hidden` / `cell` - this layer's state, updated in place
/// * `scratch` - buffer of length `4 * hidden` for the recurrent projection
pub fn lstm_step(
    layer: &LstmLayerParams,
    input_gates: &[f32],
    hidden: &mut [f32],
    cell: &mut [f32],
    scratch: &mut [f32],
) {
    let h = hidden.len();
    debug_assert_eq!(input_gates.len(), 4 * h);
    debug_assert_eq!(scratch.len(), 4 * h);

    linear_into(scratch, hidden, &layer.weight_hh, &layer.bias_hh);

    for j in 0..h {
        let i = sigmoid(input_gates[j] + scratch[j]);
        let f = sigmoid(input_gates[h + j] + scratch[h + j]);
        let g = (input_gates[2 * h + j] + scratch[2 * h + j]).tanh();
        let o = sigmoid(input_gates[3 * h + j] + scratch[3 * h + j]);

        cell[j] = f * cell[j] + i * g;
        hidden[j] = o * cell[j].tanh();
    }
}
