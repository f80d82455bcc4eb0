//! Progress events published for a training session.

use serde::{Deserialize, Serialize};

use crate::traits::ModelId;

/// Metrics reported for one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
}

/// Why a session failed.
///
/// Lets subscribers tell bad input from trainer trouble from storage trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DatasetNotFound,
    InvalidDataset,
    TrainerConstruction,
    Fit,
    Persistence,
    /// The server stopped while the session was running.
    Shutdown,
}

/// One event on a session's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Fitting is about to begin.
    #[serde(rename_all = "camelCase")]
    Started { total_epochs: u32 },
    /// One epoch finished. `epoch` is 1-based.
    #[serde(rename_all = "camelCase")]
    Progress {
        epoch: u32,
        total_epochs: u32,
        /// Completion percentage, `epoch / total_epochs * 100`.
        progress: f64,
        #[serde(flatten)]
        metrics: EpochMetrics,
    },
    /// Terminal: model trained and persisted.
    #[serde(rename_all = "camelCase")]
    Complete {
        model_id: ModelId,
        final_metrics: EpochMetrics,
    },
    /// Terminal: the session failed.
    Error { kind: FailureKind, message: String },
    /// Terminal: the deadline passed first.
    #[serde(rename_all = "camelCase")]
    Timeout { message: String, elapsed_secs: u64 },
}

impl ProgressEvent {
    /// Build a progress event for a 1-based epoch.
    #[must_use]
    pub fn progress(epoch: u32, total_epochs: u32, metrics: EpochMetrics) -> Self {
        let progress = if total_epochs == 0 {
            100.0
        } else {
            f64::from(epoch) / f64::from(total_epochs) * 100.0
        };
        Self::Progress {
            epoch,
            total_epochs,
            progress,
            metrics,
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Timeout { .. }
        )
    }

    /// Short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Timeout { .. } => "timeout",
        }
    }
}
