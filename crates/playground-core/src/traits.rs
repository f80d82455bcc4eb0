//! Identifiers, session status and the collaborator traits the orchestrator
//! depends on.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dataset::{Dataset, DatasetKind, DatasetListing, DatasetRef, DataSplit},
    event::EpochMetrics,
    model::{ModelArtifact, ModelMetadata, ModelSummary, ModelWeights},
    request::{Architecture, Hyperparameters},
};

/// Session identifier.
pub type SessionId = Uuid;

/// Stored model identifier.
pub type ModelId = Uuid;

/// Progress subscriber identifier.
pub type SubscriberId = Uuid;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepted, dataset and model not ready yet.
    Initializing,
    /// Fitting.
    Training,
    /// Model trained and persisted.
    Completed,
    /// Failed before completion.
    Failed,
    /// Deadline passed first.
    TimedOut,
}

impl SessionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Whether moving to `next` keeps the status monotonic.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Initializing, Self::Training) => true,
            (Self::Initializing | Self::Training, n) => n.is_terminal(),
            _ => false,
        }
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Dataset lookup and persistence.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Resolve a built-in key or persisted id. `Ok(None)` means not found.
    async fn resolve(&self, dataset: &DatasetRef) -> Result<Option<Dataset>, StoreError>;

    /// List built-in and persisted datasets.
    async fn list(&self) -> Result<DatasetListing, StoreError>;

    /// Persist a dataset and return its reference.
    async fn insert(
        &self,
        name: String,
        kind: DatasetKind,
        dataset: Dataset,
    ) -> Result<DatasetRef, StoreError>;
}

/// Model persistence.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist a model and return its id.
    async fn save(
        &self,
        name: String,
        architecture: &Architecture,
        weights: ModelWeights,
        metadata: ModelMetadata,
    ) -> Result<ModelId, StoreError>;

    /// Load a model. `Ok(None)` means not found.
    async fn load(&self, id: ModelId) -> Result<Option<ModelArtifact>, StoreError>;

    /// List models, newest first.
    async fn list(&self) -> Result<Vec<ModelSummary>, StoreError>;

    /// Delete a model, returning what was removed.
    async fn delete(&self, id: ModelId) -> Result<Option<ModelSummary>, StoreError>;
}

/// Numerical collaborator error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainerError {
    #[error("Model construction failed: {0}")]
    Construction(String),
    #[error("Training failed: {0}")]
    Fit(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Input shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Training cancelled")]
    Cancelled,
}

/// Lazy, finite, non-restartable sequence of per-epoch metrics.
pub type EpochStream = BoxStream<'static, Result<EpochMetrics, TrainerError>>;

/// Fit loop settings resolved by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    pub epochs: u32,
    pub batch_size: usize,
}

/// Builds training jobs and restores stored models.
pub trait Trainer: Send + Sync {
    /// Construct an untrained model.
    ///
    /// # Errors
    /// Returns `Construction` if the architecture cannot be built.
    fn build(&self, architecture: &Architecture) -> Result<Box<dyn TrainingJob>, TrainerError>;

    /// Rebuild a trained model for inference.
    ///
    /// # Errors
    /// Returns `Construction` if the weights do not fit the architecture.
    fn restore(
        &self,
        architecture: &Architecture,
        weights: &ModelWeights,
    ) -> Result<Box<dyn Predictor>, TrainerError>;
}

/// One model being trained.
pub trait TrainingJob: Send {
    /// Select optimizer and loss.
    ///
    /// # Errors
    /// Returns `Construction` for unsupported settings.
    fn compile(&mut self, hyperparameters: &Hyperparameters) -> Result<(), TrainerError>;

    /// Start fitting. The first `split.train_len` samples train, the rest validate.
    ///
    /// # Errors
    /// Returns `Fit` if the data does not fit the model.
    fn fit(
        &mut self,
        data: Dataset,
        split: DataSplit,
        options: FitOptions,
    ) -> Result<EpochStream, TrainerError>;

    /// Stop any in-flight fit as soon as possible. Idempotent.
    fn cancel(&self);

    /// Snapshot the trained weights once the epoch stream is exhausted.
    ///
    /// # Errors
    /// Returns `Fit` if the weights are unavailable.
    fn export(&self) -> Result<ModelWeights, TrainerError>;
}

/// Result of one inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub output: Vec<f64>,
    /// Per-class probabilities, when the model produces them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Vec<f64>>,
}

/// A restored model.
pub trait Predictor: Send + Sync {
    /// Number of values one input sample must have.
    fn input_width(&self) -> usize;

    /// Run one forward pass.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` for wrongly sized input, `Inference` otherwise.
    fn predict(&self, inputs: &[f64]) -> Result<Inference, TrainerError>;
}
