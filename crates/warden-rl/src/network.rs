//! Two-layer action-value approximator.
//!
//! `input -> ReLU(hidden) -> linear(output)`, one output per action.
//! Weight layout is row-major by source unit: `w_hidden[i * hidden + h]`,
//! `w_output[h * output + o]`.

use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Result, RlError};

/// Which weights a training step touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainMode {
    /// Only hidden->output weights and output biases move. Hidden features
    /// stay at their random initialization.
    #[default]
    OutputLayer,
    /// Gradient also flows through the ReLU into input->hidden weights.
    FullBackprop,
}

/// Serializable copy of a network's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub w_hidden: Vec<f64>,
    pub b_hidden: Vec<f64>,
    pub w_output: Vec<f64>,
    pub b_output: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QNetwork {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
    learning_rate: f64,
    mode: TrainMode,
    w_hidden: Vec<f64>,
    b_hidden: Vec<f64>,
    w_output: Vec<f64>,
    b_output: Vec<f64>,
}

/// Zero-mean normal sample via Box-Muller.
fn sample_normal<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    // 1 - [0, 1) keeps u1 in (0, 1] so ln(u1) is finite.
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn init_layer<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, fan_out: usize) -> Vec<f64> {
    let std_dev = (2.0 / (fan_in + fan_out) as f64).sqrt();
    (0..fan_in * fan_out)
        .map(|_| sample_normal(rng, std_dev))
        .collect()
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

impl QNetwork {
    /// Weights drawn from N(0, 2 / (fan_in + fan_out)) per layer; biases zero.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        learning_rate: f64,
        mode: TrainMode,
        rng: &mut R,
    ) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            learning_rate,
            mode,
            w_hidden: init_layer(rng, input_size, hidden_size),
            b_hidden: vec![0.0; hidden_size],
            w_output: init_layer(rng, hidden_size, output_size),
            b_output: vec![0.0; output_size],
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn mode(&self) -> TrainMode {
        self.mode
    }

    fn check_input(&self, features: &[f64]) -> Result<()> {
        if features.len() != self.input_size {
            return Err(RlError::DimensionMismatch {
                expected: self.input_size,
                actual: features.len(),
            });
        }
        Ok(())
    }

    fn forward(&self, input: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut hidden = self.b_hidden.clone();
        for (i, x) in input.iter().enumerate() {
            let row = &self.w_hidden[i * self.hidden_size..(i + 1) * self.hidden_size];
            for (h, w) in row.iter().enumerate() {
                hidden[h] += x * w;
            }
        }
        for h in hidden.iter_mut() {
            *h = relu(*h);
        }

        let mut output = self.b_output.clone();
        for (h, a) in hidden.iter().enumerate() {
            let row = &self.w_output[h * self.output_size..(h + 1) * self.output_size];
            for (o, w) in row.iter().enumerate() {
                output[o] += a * w;
            }
        }

        (hidden, output)
    }

    /// One value estimate per action.
    pub fn predict(&self, features: &[f64]) -> Result<Vec<f64>> {
        self.check_input(features)?;
        Ok(self.forward(features).1)
    }

    /// Single-sample gradient step on mean squared error. Returns the loss
    /// measured before the update.
    pub fn train(&mut self, features: &[f64], target: &[f64]) -> Result<f64> {
        self.check_input(features)?;
        if target.len() != self.output_size {
            return Err(RlError::DimensionMismatch {
                expected: self.output_size,
                actual: target.len(),
            });
        }

        let (hidden, output) = self.forward(features);
        let n = self.output_size as f64;

        let loss = output
            .iter()
            .zip(target)
            .map(|(y, t)| (y - t) * (y - t))
            .sum::<f64>()
            / n;

        // dL/dy_o
        let grad_out: Vec<f64> = output
            .iter()
            .zip(target)
            .map(|(y, t)| 2.0 * (y - t) / n)
            .collect();

        // Hidden deltas use the pre-update output weights.
        let grad_hidden: Option<Vec<f64>> = match self.mode {
            TrainMode::OutputLayer => None,
            TrainMode::FullBackprop => Some(
                hidden
                    .iter()
                    .enumerate()
                    .map(|(h, a)| {
                        if *a <= 0.0 {
                            return 0.0;
                        }
                        let row = &self.w_output[h * self.output_size..(h + 1) * self.output_size];
                        row.iter().zip(&grad_out).map(|(w, g)| w * g).sum::<f64>()
                    })
                    .collect(),
            ),
        };

        let lr = self.learning_rate;
        for (h, a) in hidden.iter().enumerate() {
            let row = &mut self.w_output[h * self.output_size..(h + 1) * self.output_size];
            for (w, g) in row.iter_mut().zip(&grad_out) {
                *w -= lr * g * a;
            }
        }
        for (b, g) in self.b_output.iter_mut().zip(&grad_out) {
            *b -= lr * g;
        }

        if let Some(grad_hidden) = grad_hidden {
            for (i, x) in features.iter().enumerate() {
                let row = &mut self.w_hidden[i * self.hidden_size..(i + 1) * self.hidden_size];
                for (w, d) in row.iter_mut().zip(&grad_hidden) {
                    *w -= lr * d * x;
                }
            }
            for (b, d) in self.b_hidden.iter_mut().zip(&grad_hidden) {
                *b -= lr * d;
            }
        }

        Ok(loss)
    }

    fn same_shape(&self, input: usize, hidden: usize, output: usize) -> bool {
        self.input_size == input && self.hidden_size == hidden && self.output_size == output
    }

    /// Overwrite this network's parameters with `other`'s.
    pub fn copy_weights_from(&mut self, other: &QNetwork) -> Result<()> {
        if !self.same_shape(other.input_size, other.hidden_size, other.output_size) {
            return Err(RlError::IncompatibleSnapshot(format!(
                "expected {}x{}x{}, got {}x{}x{}",
                self.input_size,
                self.hidden_size,
                self.output_size,
                other.input_size,
                other.hidden_size,
                other.output_size
            )));
        }
        self.w_hidden.copy_from_slice(&other.w_hidden);
        self.b_hidden.copy_from_slice(&other.b_hidden);
        self.w_output.copy_from_slice(&other.w_output);
        self.b_output.copy_from_slice(&other.b_output);
        Ok(())
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
            w_hidden: self.w_hidden.clone(),
            b_hidden: self.b_hidden.clone(),
            w_output: self.w_output.clone(),
            b_output: self.b_output.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &NetworkSnapshot) -> Result<()> {
        let (i, h, o) = (
            snapshot.input_size,
            snapshot.hidden_size,
            snapshot.output_size,
        );
        if !self.same_shape(i, h, o) {
            return Err(RlError::IncompatibleSnapshot(format!(
                "network is {}x{}x{}, snapshot is {i}x{h}x{o}",
                self.input_size, self.hidden_size, self.output_size
            )));
        }
        if snapshot.w_hidden.len() != i * h
            || snapshot.b_hidden.len() != h
            || snapshot.w_output.len() != h * o
            || snapshot.b_output.len() != o
        {
            return Err(RlError::IncompatibleSnapshot(
                "parameter vector lengths disagree with declared shape".to_string(),
            ));
        }
        self.w_hidden.copy_from_slice(&snapshot.w_hidden);
        self.b_hidden.copy_from_slice(&snapshot.b_hidden);
        self.w_output.copy_from_slice(&snapshot.w_output);
        self.b_output.copy_from_slice(&snapshot.b_output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn init_variance_tracks_fan() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = QNetwork::new(64, 64, 4, 0.001, TrainMode::OutputLayer, &mut rng);

        let n = net.w_hidden.len() as f64;
        let mean = net.w_hidden.iter().sum::<f64>() / n;
        let var = net.w_hidden.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n;

        assert!(mean.abs() < 0.02, "mean {mean}");
        assert!((var - 2.0 / 128.0).abs() < 0.004, "var {var}");
        assert!(net.b_hidden.iter().chain(&net.b_output).all(|b| *b == 0.0));
    }

    #[test]
    fn output_layer_mode_leaves_hidden_weights_alone() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut net = QNetwork::new(3, 8, 2, 0.05, TrainMode::OutputLayer, &mut rng);
        let before = net.clone();

        net.train(&[0.3, 0.6, 0.9], &[5.0, -5.0]).expect("train");

        assert_eq!(net.w_hidden, before.w_hidden);
        assert_eq!(net.b_hidden, before.b_hidden);
        assert_ne!(net.b_output, before.b_output);
    }

    #[test]
    fn full_backprop_moves_hidden_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut net = QNetwork::new(3, 32, 2, 0.05, TrainMode::FullBackprop, &mut rng);
        let before = net.clone();

        net.train(&[0.3, 0.6, 0.9], &[5.0, -5.0]).expect("train");

        assert_ne!(net.w_hidden, before.w_hidden);
    }
}
