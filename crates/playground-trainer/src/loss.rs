//! Loss functions and the accuracy metric.

use playground_core::request::Loss;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs.
const EPSILON: f64 = 1e-7;

fn clip(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// Loss of one sample.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn value(loss: Loss, predicted: &[f64], target: &[f64]) -> f64 {
    let pairs = predicted.iter().zip(target);
    let n = predicted.len().max(1) as f64;
    match loss {
        Loss::MeanSquaredError => pairs.map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n,
        Loss::BinaryCrossentropy => {
            -pairs
                .map(|(p, t)| {
                    let p = clip(*p);
                    t * p.ln() + (1.0 - t) * (1.0 - p).ln()
                })
                .sum::<f64>()
                / n
        }
        Loss::CategoricalCrossentropy => -pairs.map(|(p, t)| t * clip(*p).ln()).sum::<f64>(),
    }
}

/// Gradient of [`value`] with respect to each predicted value.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gradient(loss: Loss, predicted: &[f64], target: &[f64]) -> Vec<f64> {
    let pairs = predicted.iter().zip(target);
    let n = predicted.len().max(1) as f64;
    match loss {
        Loss::MeanSquaredError => pairs.map(|(p, t)| 2.0 * (p - t) / n).collect(),
        Loss::BinaryCrossentropy => pairs
            .map(|(p, t)| {
                let p = clip(*p);
                (p - t) / (p * (1.0 - p)) / n
            })
            .collect(),
        Loss::CategoricalCrossentropy => pairs.map(|(p, t)| -t / clip(*p)).collect(),
    }
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Whether a prediction counts as correct.
///
/// Single-column outputs are thresholded at 0.5; wider outputs compare the
/// arg-max class.
#[must_use]
pub fn is_correct(predicted: &[f64], target: &[f64]) -> bool {
    match (predicted, target) {
        ([p], [t]) => (*p >= 0.5) == (*t >= 0.5),
        _ => argmax(predicted) == argmax(target),
    }
}
