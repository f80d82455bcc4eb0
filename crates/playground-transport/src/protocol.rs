//! Wire protocol for client-server communication.

use playground_core::{EpochMetrics, FailureKind, ModelId, ProgressEvent, SessionId};
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Start receiving a session's progress.
    JoinTrainingSession { session_id: SessionId },
    /// Stop receiving a session's progress.
    LeaveTrainingSession { session_id: SessionId },
    /// Pause a running session. Not supported; answered with an error.
    PauseTraining { session_id: SessionId },
    /// Stop a running session. Not supported; answered with an error.
    StopTraining { session_id: SessionId },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    TrainingStarted {
        session_id: SessionId,
        total_epochs: u32,
    },
    TrainingProgress {
        session_id: SessionId,
        epoch: u32,
        total_epochs: u32,
        progress: f64,
        #[serde(flatten)]
        metrics: EpochMetrics,
    },
    TrainingComplete {
        session_id: SessionId,
        model_id: ModelId,
        final_metrics: EpochMetrics,
    },
    TrainingError {
        session_id: SessionId,
        kind: FailureKind,
        message: String,
    },
    TrainingTimeout {
        session_id: SessionId,
        message: String,
        elapsed_secs: u64,
    },
    /// Join acknowledged.
    Joined { session_id: SessionId },
    /// Leave acknowledged.
    Left { session_id: SessionId },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Wrap a progress event for the client that joined `session_id`.
    #[must_use]
    pub fn from_event(session_id: SessionId, event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Started { total_epochs } => Self::TrainingStarted {
                session_id,
                total_epochs,
            },
            ProgressEvent::Progress {
                epoch,
                total_epochs,
                progress,
                metrics,
            } => Self::TrainingProgress {
                session_id,
                epoch,
                total_epochs,
                progress,
                metrics,
            },
            ProgressEvent::Complete {
                model_id,
                final_metrics,
            } => Self::TrainingComplete {
                session_id,
                model_id,
                final_metrics,
            },
            ProgressEvent::Error { kind, message } => Self::TrainingError {
                session_id,
                kind,
                message,
            },
            ProgressEvent::Timeout {
                message,
                elapsed_secs,
            } => Self::TrainingTimeout {
                session_id,
                message,
                elapsed_secs,
            },
        }
    }
}
