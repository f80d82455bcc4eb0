//! Training request payloads and their validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::DatasetRef;

/// Activation function applied after a dense layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

fn default_dropout_rate() -> f64 {
    0.2
}

/// One layer of a sequential model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerSpec {
    /// Fully connected layer.
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Dropout layer, active only while fitting.
    Dropout {
        #[serde(default = "default_dropout_rate")]
        rate: f64,
    },
}

/// Sequential model architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Architecture {
    /// Shape of one input sample. Only the product matters to dense models.
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerSpec>,
}

impl Architecture {
    /// Flattened width of one input sample. Zero when the shape is empty.
    #[must_use]
    pub fn input_width(&self) -> usize {
        if self.input_shape.is_empty() {
            return 0;
        }
        self.input_shape.iter().product()
    }
}

/// Optimizer used to apply gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    Sgd,
    #[default]
    Adam,
}

/// Training loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Loss {
    #[default]
    MeanSquaredError,
    BinaryCrossentropy,
    CategoricalCrossentropy,
}

fn default_metrics() -> Vec<String> {
    vec!["accuracy".to_string()]
}

/// Compile and fit parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default)]
    pub loss: Loss,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::default(),
            loss: Loss::default(),
            metrics: default_metrics(),
            epochs: None,
            batch_size: None,
            learning_rate: None,
        }
    }
}

impl Hyperparameters {
    /// Whether the accuracy metric was requested.
    #[must_use]
    pub fn wants_accuracy(&self) -> bool {
        self.metrics
            .iter()
            .any(|m| m.eq_ignore_ascii_case("accuracy") || m.eq_ignore_ascii_case("acc"))
    }
}

/// Start-training request as it arrives from a client.
///
/// Every part is optional on the wire so that a missing part is reported
/// as a validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub dataset: Option<DatasetRef>,
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
}

/// A request that passed validation. Read-only for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub architecture: Architecture,
    pub dataset: DatasetRef,
    pub hyperparameters: Hyperparameters,
}

/// Malformed start request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required parameters: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Architecture has no layers")]
    NoLayers,
    #[error("Architecture input shape is empty or zero-sized")]
    EmptyInputShape,
    #[error("Dataset reference is empty")]
    EmptyDataset,
    #[error("{0} must be at least 1")]
    NotPositive(&'static str),
}

impl TrainRequest {
    /// Create a request with every part present.
    #[must_use]
    pub fn new(
        architecture: Architecture,
        dataset: DatasetRef,
        hyperparameters: Hyperparameters,
    ) -> Self {
        Self {
            architecture: Some(architecture),
            dataset: Some(dataset),
            hyperparameters: Some(hyperparameters),
        }
    }

    /// Check the request shape without touching any shared state.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(self) -> Result<TrainingSpec, ValidationError> {
        let (architecture, dataset, hyperparameters) =
            match (self.architecture, self.dataset, self.hyperparameters) {
                (Some(a), Some(d), Some(h)) => (a, d, h),
                (a, d, h) => {
                    let mut missing = Vec::new();
                    if a.is_none() {
                        missing.push("architecture");
                    }
                    if d.is_none() {
                        missing.push("dataset");
                    }
                    if h.is_none() {
                        missing.push("hyperparameters");
                    }
                    return Err(ValidationError::Missing(missing));
                }
            };

        if architecture.layers.is_empty() {
            return Err(ValidationError::NoLayers);
        }
        if architecture.input_width() == 0 {
            return Err(ValidationError::EmptyInputShape);
        }
        if dataset.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyDataset);
        }
        if hyperparameters.epochs == Some(0) {
            return Err(ValidationError::NotPositive("epochs"));
        }
        if hyperparameters.batch_size == Some(0) {
            return Err(ValidationError::NotPositive("batchSize"));
        }

        Ok(TrainingSpec {
            architecture,
            dataset,
            hyperparameters,
        })
    }
}
