//! Core abstractions for training session orchestration.
//!
//! This crate provides the fundamental building blocks:
//! - `ProgressChannel` - Per-session fan-out of progress events
//! - `ProgressEvent` - Typed progress event enum
//! - `TrainRequest` - Start request payload and validation
//! - Trainer and store traits

pub mod dataset;
pub mod event;
pub mod model;
pub mod progress;
pub mod request;
pub mod traits;

pub use dataset::{Dataset, DatasetKind, DatasetRef, DataSplit};
pub use event::{EpochMetrics, FailureKind, ProgressEvent};
pub use model::{ModelArtifact, ModelMetadata, ModelSummary, ModelWeights};
pub use progress::{ProgressChannel, Subscription};
pub use request::{Architecture, Hyperparameters, TrainRequest, TrainingSpec, ValidationError};
pub use traits::{
    DatasetStore, ModelId, ModelStore, Predictor, SessionId, SessionStatus, Trainer,
    TrainerError, TrainingJob,
};
