//! Sequential dense network with forward and backward passes.

use playground_core::{
    Architecture, TrainerError,
    request::{Activation, LayerSpec, Loss},
};
use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{loss, optimizer::OptimizerState};

fn activate(activation: Activation, z: &mut [f64]) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => z.iter_mut().for_each(|v| *v = v.max(0.0)),
        Activation::Sigmoid => z.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
        Activation::Tanh => z.iter_mut().for_each(|v| *v = v.tanh()),
        Activation::Softmax => {
            let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for v in z.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in z.iter_mut() {
                *v /= sum;
            }
        }
    }
}

/// Gradient with respect to the pre-activation values, given the layer
/// output and the gradient with respect to that output.
fn activation_gradient(activation: Activation, output: &[f64], upstream: &[f64]) -> Vec<f64> {
    let pairs = output.iter().zip(upstream);
    match activation {
        Activation::Linear => upstream.to_vec(),
        Activation::Relu => pairs.map(|(a, g)| if *a > 0.0 { *g } else { 0.0 }).collect(),
        Activation::Sigmoid => pairs.map(|(a, g)| g * a * (1.0 - a)).collect(),
        Activation::Tanh => pairs.map(|(a, g)| g * (1.0 - a * a)).collect(),
        Activation::Softmax => {
            let dot: f64 = pairs.clone().map(|(a, g)| a * g).sum();
            pairs.map(|(a, g)| a * (g - dot)).collect()
        }
    }
}

/// Fully connected layer. `kernel` is `units x inputs`, row-major.
#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    units: usize,
    activation: Activation,
    kernel: Vec<f64>,
    bias: Vec<f64>,
}

impl Dense {
    /// Glorot-uniform kernel, zero bias.
    #[allow(clippy::cast_precision_loss)]
    fn new(inputs: usize, units: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + units) as f64).sqrt();
        Self {
            inputs,
            units,
            activation,
            kernel: (0..inputs * units)
                .map(|_| rng.gen_range(-limit..limit))
                .collect(),
            bias: vec![0.0; units],
        }
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        let mut z: Vec<f64> = self
            .kernel
            .chunks_exact(self.inputs)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect();
        activate(self.activation, &mut z);
        z
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Dense(Dense),
    Dropout { rate: f64 },
}

/// Accumulated gradients, one entry per layer. Empty for dropout layers.
#[derive(Debug, Clone)]
pub struct Gradients {
    layers: Vec<LayerGradient>,
}

#[derive(Debug, Clone, Default)]
struct LayerGradient {
    kernel: Vec<f64>,
    bias: Vec<f64>,
}

/// Stored parameters of one dense layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseWeights {
    /// `[units, inputs]`
    pub shape: [usize; 2],
    pub kernel: Vec<f64>,
    pub bias: Vec<f64>,
}

/// Stored parameters of a network, dense layers in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub layers: Vec<DenseWeights>,
}

/// A sequential stack of dense and dropout layers.
#[derive(Debug, Clone)]
pub struct Network {
    input_width: usize,
    layers: Vec<Layer>,
}

impl Network {
    /// Build an untrained network.
    ///
    /// # Errors
    /// Returns `Construction` for an empty input, a zero-unit layer, a dropout
    /// rate outside `[0, 1)` or a stack that does not end in a dense layer.
    pub fn build(architecture: &Architecture, rng: &mut StdRng) -> Result<Self, TrainerError> {
        let input_width = architecture.input_width();
        if input_width == 0 {
            return Err(TrainerError::Construction(
                "input shape must have at least one value".to_string(),
            ));
        }

        let mut width = input_width;
        let mut layers = Vec::with_capacity(architecture.layers.len());
        for (i, spec) in architecture.layers.iter().enumerate() {
            match *spec {
                LayerSpec::Dense { units, activation } => {
                    if units == 0 {
                        return Err(TrainerError::Construction(format!(
                            "layer {i}: dense layer needs at least one unit"
                        )));
                    }
                    layers.push(Layer::Dense(Dense::new(width, units, activation, rng)));
                    width = units;
                }
                LayerSpec::Dropout { rate } => {
                    if !(0.0..1.0).contains(&rate) {
                        return Err(TrainerError::Construction(format!(
                            "layer {i}: dropout rate must be in [0, 1), got {rate}"
                        )));
                    }
                    layers.push(Layer::Dropout { rate });
                }
            }
        }

        if !matches!(layers.last(), Some(Layer::Dense(_))) {
            return Err(TrainerError::Construction(
                "the last layer must be dense".to_string(),
            ));
        }

        Ok(Self {
            input_width,
            layers,
        })
    }

    fn dense_layers(&self) -> impl DoubleEndedIterator<Item = &Dense> {
        self.layers.iter().filter_map(|l| match l {
            Layer::Dense(d) => Some(d),
            Layer::Dropout { .. } => None,
        })
    }

    #[must_use]
    pub const fn input_width(&self) -> usize {
        self.input_width
    }

    #[must_use]
    pub fn output_width(&self) -> usize {
        self.dense_layers().next_back().map_or(0, |d| d.units)
    }

    #[must_use]
    pub fn output_activation(&self) -> Activation {
        self.dense_layers()
            .next_back()
            .map_or(Activation::Linear, |d| d.activation)
    }

    /// Inference pass. Dropout is inactive.
    #[must_use]
    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        self.dense_layers()
            .fold(x.to_vec(), |input, dense| dense.forward(&input))
    }

    /// Empty gradient accumulator shaped like this network.
    #[must_use]
    pub fn zero_gradients(&self) -> Gradients {
        Gradients {
            layers: self
                .layers
                .iter()
                .map(|l| match l {
                    Layer::Dense(d) => LayerGradient {
                        kernel: vec![0.0; d.kernel.len()],
                        bias: vec![0.0; d.bias.len()],
                    },
                    Layer::Dropout { .. } => LayerGradient::default(),
                })
                .collect(),
        }
    }

    /// Forward and backward pass for one sample, adding its gradients to `grads`.
    ///
    /// Dropout is applied only when `rng` is given. Returns the prediction and
    /// the sample loss.
    pub fn accumulate(
        &self,
        x: &[f64],
        target: &[f64],
        loss_fn: Loss,
        mut rng: Option<&mut StdRng>,
        grads: &mut Gradients,
    ) -> (Vec<f64>, f64) {
        let mut activations: Vec<Vec<f64>> = Vec::with_capacity(self.layers.len() + 1);
        let mut masks: Vec<Option<Vec<f64>>> = Vec::with_capacity(self.layers.len());
        activations.push(x.to_vec());

        for layer in &self.layers {
            let input = &activations[activations.len() - 1];
            let (output, mask) = match layer {
                Layer::Dense(d) => (d.forward(input), None),
                Layer::Dropout { rate } => match rng.as_deref_mut() {
                    Some(rng) if *rate > 0.0 => {
                        let keep = 1.0 / (1.0 - rate);
                        let mask: Vec<f64> = input
                            .iter()
                            .map(|_| if rng.r#gen::<f64>() < *rate { 0.0 } else { keep })
                            .collect();
                        let output = input.iter().zip(&mask).map(|(v, m)| v * m).collect();
                        (output, Some(mask))
                    }
                    _ => (input.clone(), None),
                },
            };
            activations.push(output);
            masks.push(mask);
        }

        let prediction = activations[self.layers.len()].clone();
        let sample_loss = loss::value(loss_fn, &prediction, target);
        let mut upstream = loss::gradient(loss_fn, &prediction, target);

        for (i, layer) in self.layers.iter().enumerate().rev() {
            match layer {
                Layer::Dropout { .. } => {
                    if let Some(mask) = &masks[i] {
                        upstream.iter_mut().zip(mask).for_each(|(g, m)| *g *= m);
                    }
                }
                Layer::Dense(d) => {
                    let input = &activations[i];
                    let dz = activation_gradient(d.activation, &activations[i + 1], &upstream);
                    let slot = &mut grads.layers[i];
                    for (u, g) in dz.iter().enumerate() {
                        slot.bias[u] += g;
                        slot.kernel[u * d.inputs..(u + 1) * d.inputs]
                            .iter_mut()
                            .zip(input)
                            .for_each(|(k, x)| *k += g * x);
                    }

                    let mut next = vec![0.0; d.inputs];
                    for (row, g) in d.kernel.chunks_exact(d.inputs).zip(&dz) {
                        next.iter_mut().zip(row).for_each(|(n, w)| *n += w * g);
                    }
                    upstream = next;
                }
            }
        }

        (prediction, sample_loss)
    }

    /// Apply `grads * scale` to every dense layer.
    pub fn apply(&mut self, grads: &Gradients, optimizer: &mut OptimizerState, scale: f64) {
        optimizer.begin_step();
        let mut slot = 0;
        for (layer, g) in self.layers.iter_mut().zip(&grads.layers) {
            if let Layer::Dense(d) = layer {
                optimizer.update(slot, &mut d.kernel, &g.kernel, scale);
                optimizer.update(slot + 1, &mut d.bias, &g.bias, scale);
                slot += 2;
            }
        }
    }

    /// Snapshot the trained parameters.
    #[must_use]
    pub fn export(&self) -> NetworkWeights {
        NetworkWeights {
            layers: self
                .dense_layers()
                .map(|d| DenseWeights {
                    shape: [d.units, d.inputs],
                    kernel: d.kernel.clone(),
                    bias: d.bias.clone(),
                })
                .collect(),
        }
    }

    /// Replace the parameters with stored ones.
    ///
    /// # Errors
    /// Returns `Construction` if the stored layers do not match this network's
    /// shape or contain non-finite values.
    pub fn load(&mut self, weights: NetworkWeights) -> Result<(), TrainerError> {
        let expected = self.dense_layers().count();
        if weights.layers.len() != expected {
            return Err(TrainerError::Construction(format!(
                "expected weights for {expected} dense layers, got {}",
                weights.layers.len()
            )));
        }

        let dense = self.layers.iter_mut().filter_map(|l| match l {
            Layer::Dense(d) => Some(d),
            Layer::Dropout { .. } => None,
        });
        let mut staged = Vec::with_capacity(expected);
        for (i, (d, stored)) in dense.zip(weights.layers).enumerate() {
            if stored.shape != [d.units, d.inputs]
                || stored.kernel.len() != d.units * d.inputs
                || stored.bias.len() != d.units
            {
                return Err(TrainerError::Construction(format!(
                    "dense layer {i}: stored shape {:?} does not match [{}, {}]",
                    stored.shape, d.units, d.inputs
                )));
            }
            if !stored.kernel.iter().chain(&stored.bias).all(|v| v.is_finite()) {
                return Err(TrainerError::Construction(format!(
                    "dense layer {i}: stored weights are not finite"
                )));
            }
            staged.push((d, stored));
        }

        for (d, stored) in staged {
            d.kernel = stored.kernel;
            d.bias = stored.bias;
        }
        Ok(())
    }
}
