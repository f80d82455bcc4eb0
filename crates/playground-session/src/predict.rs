//! Model loading, inference and model management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use playground_core::{
    Architecture, ModelArtifact, ModelId, ModelMetadata, ModelStore, ModelSummary, ModelWeights,
    Trainer, TrainerError, traits::StoreError,
};
use serde::Serialize;

/// Model path error. Each failure mode is reported distinctly.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not found: {0}")]
    NotFound(ModelId),
    #[error("Failed to reconstruct model: {0}")]
    Reconstruction(TrainerError),
    #[error("Input shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Inference failed: {0}")]
    Inference(TrainerError),
    #[error("Invalid model: {0}")]
    Invalid(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub prediction: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Vec<f64>>,
    pub model_id: ModelId,
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Loads stored models and runs inference through the trainer.
#[derive(Clone)]
pub struct ModelService {
    models: Arc<dyn ModelStore>,
    trainer: Arc<dyn Trainer>,
}

impl ModelService {
    #[must_use]
    pub fn new(models: Arc<dyn ModelStore>, trainer: Arc<dyn Trainer>) -> Self {
        Self { models, trainer }
    }

    /// Run one inference with a stored model.
    ///
    /// # Errors
    /// `NotFound`, `Reconstruction`, `ShapeMismatch`, `Inference` or
    /// `Persistence`, never a coerced result.
    pub async fn predict(&self, id: ModelId, inputs: &[f64]) -> Result<Prediction, ModelError> {
        let artifact = self.get(id).await?;
        let predictor = self
            .trainer
            .restore(&artifact.architecture, &artifact.weights)
            .map_err(ModelError::Reconstruction)?;

        let expected = predictor.input_width();
        if inputs.len() != expected {
            return Err(ModelError::ShapeMismatch {
                expected,
                actual: inputs.len(),
            });
        }

        let inference = predictor.predict(inputs).map_err(|e| match e {
            TrainerError::ShapeMismatch { expected, actual } => {
                ModelError::ShapeMismatch { expected, actual }
            }
            other => ModelError::Inference(other),
        })?;

        tracing::debug!(model_id = %id, "Prediction served");
        Ok(Prediction {
            prediction: inference.output,
            confidence: inference.confidence,
            model_id: id,
            model_name: artifact.name,
            timestamp: Utc::now(),
        })
    }

    /// Load a stored model with its training history.
    ///
    /// # Errors
    /// `NotFound` or `Persistence`.
    pub async fn get(&self, id: ModelId) -> Result<ModelArtifact, ModelError> {
        self.models.load(id).await?.ok_or(ModelError::NotFound(id))
    }

    /// List stored models, newest first.
    ///
    /// # Errors
    /// `Persistence`.
    pub async fn list(&self) -> Result<Vec<ModelSummary>, ModelError> {
        Ok(self.models.list().await?)
    }

    /// Store a model trained elsewhere.
    ///
    /// The weights must be restorable against the architecture.
    ///
    /// # Errors
    /// `Invalid` for an empty name, `Reconstruction` for unusable weights,
    /// `Persistence` otherwise.
    pub async fn save(
        &self,
        name: String,
        architecture: Architecture,
        weights: ModelWeights,
        metadata: ModelMetadata,
    ) -> Result<ModelId, ModelError> {
        if name.trim().is_empty() {
            return Err(ModelError::Invalid("name is required".to_string()));
        }
        self.trainer
            .restore(&architecture, &weights)
            .map_err(ModelError::Reconstruction)?;
        let id = self
            .models
            .save(name, &architecture, weights, metadata)
            .await?;
        tracing::info!(model_id = %id, "Model saved");
        Ok(id)
    }

    /// Delete a stored model.
    ///
    /// # Errors
    /// `NotFound` or `Persistence`.
    pub async fn delete(&self, id: ModelId) -> Result<ModelSummary, ModelError> {
        let deleted = self
            .models
            .delete(id)
            .await?
            .ok_or(ModelError::NotFound(id))?;
        tracing::info!(model_id = %id, "Model deleted");
        Ok(deleted)
    }
}
