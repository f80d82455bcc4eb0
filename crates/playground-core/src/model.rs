//! Persisted model artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dataset::DatasetRef,
    event::EpochMetrics,
    request::{Architecture, Hyperparameters},
    traits::ModelId,
};

/// Trainer-specific weight blob. Opaque to everything but the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelWeights(pub Value);

/// One row of training history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub epoch: u32,
    #[serde(flatten)]
    pub metrics: EpochMetrics,
}

/// How a model came to be.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Hyperparameters>,
    /// Per-epoch metrics, in epoch order.
    #[serde(default)]
    pub history: Vec<EpochRecord>,
}

impl ModelMetadata {
    /// Metrics of the last recorded epoch.
    #[must_use]
    pub fn final_metrics(&self) -> Option<EpochMetrics> {
        self.history.last().map(|r| r.metrics)
    }
}

/// A stored model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub id: ModelId,
    pub name: String,
    pub architecture: Architecture,
    pub weights: ModelWeights,
    pub metadata: ModelMetadata,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    #[must_use]
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id,
            name: self.name.clone(),
            dataset: self.metadata.dataset.clone(),
            final_metrics: self.metadata.final_metrics(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub id: ModelId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_metrics: Option<EpochMetrics>,
    pub created_at: DateTime<Utc>,
}
