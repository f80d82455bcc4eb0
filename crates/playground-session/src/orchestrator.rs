//! Training orchestrator: drives one session from acceptance to teardown.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use futures::StreamExt;
use playground_core::{
    DataSplit, Dataset, DatasetRef, DatasetStore, EpochMetrics, FailureKind, ModelId, ModelMetadata,
    ModelStore, ProgressChannel, ProgressEvent, SessionId, SessionStatus, Subscription,
    TrainRequest, Trainer, TrainerError, TrainingJob, ValidationError,
    dataset::DatasetError,
    model::EpochRecord,
    traits::{FitOptions, StoreError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    registry::{SessionHandle, SessionRegistry, SessionSnapshot},
    watchdog::Watchdog,
};

/// Default per-session deadline.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for a whole session, from acceptance to terminal event.
    pub session_timeout: Duration,
    /// Epochs used when the request does not say.
    pub default_epochs: u32,
    /// Batch size used when the request does not say.
    pub default_batch_size: usize,
    /// Leading fraction of samples used for training.
    pub train_fraction: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            default_epochs: 50,
            default_batch_size: 32,
            train_fraction: 0.8,
        }
    }
}

/// Error from the asynchronous phase of a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Dataset not found: {0}")]
    DatasetNotFound(DatasetRef),
    #[error("Invalid dataset: {0}")]
    InvalidDataset(#[from] DatasetError),
    #[error("{0}")]
    Construction(TrainerError),
    #[error("{0}")]
    Fit(TrainerError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("Training timeout")]
    DeadlineExceeded,
}

impl SessionError {
    /// Kind reported on the `error` event. `None` for deadline expiry, which
    /// has its own `timeout` event.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::DatasetNotFound(_) => Some(FailureKind::DatasetNotFound),
            Self::InvalidDataset(_) => Some(FailureKind::InvalidDataset),
            Self::Construction(_) => Some(FailureKind::TrainerConstruction),
            Self::Fit(_) => Some(FailureKind::Fit),
            Self::Persistence(_) => Some(FailureKind::Persistence),
            Self::DeadlineExceeded => None,
        }
    }
}

struct Completion {
    model_id: ModelId,
    final_metrics: EpochMetrics,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    channel: Arc<ProgressChannel>,
    watchdog: Watchdog,
    datasets: Arc<dyn DatasetStore>,
    models: Arc<dyn ModelStore>,
    trainer: Arc<dyn Trainer>,
    config: OrchestratorConfig,
}

/// Training session orchestrator.
///
/// Cheap to clone; clones share the registry, channel and watchdog.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator with its own registry, channel and watchdog.
    #[must_use]
    pub fn new(
        datasets: Arc<dyn DatasetStore>,
        models: Arc<dyn ModelStore>,
        trainer: Arc<dyn Trainer>,
        config: OrchestratorConfig,
    ) -> Self {
        let channel = Arc::new(ProgressChannel::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&channel),
            config.session_timeout,
        ));
        Self {
            inner: Arc::new(Inner {
                registry,
                channel,
                watchdog: Watchdog::new(),
                datasets,
                models,
                trainer,
                config,
            }),
        }
    }

    /// Accept a training request.
    ///
    /// Returns the session id before any training work starts; progress is
    /// published on the session's topic. Must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    /// Returns the validation error for a malformed request; no session is
    /// created in that case.
    pub fn start_training(&self, request: TrainRequest) -> Result<SessionId, ValidationError> {
        let handle = self.inner.registry.create(request)?;
        let id = handle.id();
        tracing::info!(
            session_id = %id,
            dataset = %handle.spec().dataset,
            "Training session accepted"
        );

        self.arm_deadline(&handle);

        let this = self.clone();
        let session = Arc::clone(&handle);
        let task = tokio::spawn(async move { this.run_session(session).await });
        self.supervise(handle, task);

        Ok(id)
    }

    /// End the session with a `fit` failure if its task panics.
    fn supervise(&self, handle: Arc<SessionHandle>, task: JoinHandle<()>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Err(e) = task.await else {
                return;
            };
            if !e.is_panic() {
                return;
            }
            let id = handle.id();
            tracing::error!(session_id = %id, "Training session task panicked");
            let event = ProgressEvent::Error {
                kind: FailureKind::Fit,
                message: "Training task panicked".to_string(),
            };
            if handle.finish(&inner.channel, SessionStatus::Failed, &event) {
                inner.watchdog.disarm(id);
                inner.registry.remove(id);
            }
            handle.cancel();
        });
    }

    fn arm_deadline(&self, handle: &Arc<SessionHandle>) {
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(handle);
        self.inner
            .watchdog
            .arm(handle.id(), self.inner.config.session_timeout, move || {
                let elapsed = session.elapsed();
                let event = ProgressEvent::Timeout {
                    message: "Training timeout".to_string(),
                    elapsed_secs: elapsed.as_secs(),
                };
                if session.finish(&inner.channel, SessionStatus::TimedOut, &event) {
                    tracing::warn!(
                        session_id = %session.id(),
                        elapsed_secs = elapsed.as_secs(),
                        "Training session timed out"
                    );
                    inner.registry.remove(session.id());
                    session.cancel();
                }
            });
    }

    async fn run_session(&self, handle: Arc<SessionHandle>) {
        let id = handle.id();
        let (status, event) = match self.drive(&handle).await {
            Ok(Completion {
                model_id,
                final_metrics,
            }) => {
                tracing::info!(session_id = %id, model_id = %model_id, "Training session completed");
                (
                    SessionStatus::Completed,
                    ProgressEvent::Complete {
                        model_id,
                        final_metrics,
                    },
                )
            }
            Err(e) => {
                let Some(kind) = e.failure_kind() else {
                    tracing::debug!(session_id = %id, "Session task stopped after deadline");
                    return;
                };
                tracing::error!(session_id = %id, ?kind, "Training session failed: {e}");
                (
                    SessionStatus::Failed,
                    ProgressEvent::Error {
                        kind,
                        message: e.to_string(),
                    },
                )
            }
        };

        if handle.finish(&self.inner.channel, status, &event) {
            self.inner.watchdog.disarm(id);
            self.inner.registry.remove(id);
        } else if let ProgressEvent::Complete { model_id, .. } = event {
            self.discard_model(id, model_id).await;
        }
    }

    /// Delete a model saved by a session that ended some other way.
    async fn discard_model(&self, session_id: SessionId, model_id: ModelId) {
        match self.inner.models.delete(model_id).await {
            Ok(_) => tracing::info!(
                session_id = %session_id,
                model_id = %model_id,
                "Discarded model of ended session"
            ),
            Err(e) => tracing::error!(
                session_id = %session_id,
                model_id = %model_id,
                "Failed to discard model of ended session: {e}"
            ),
        }
    }

    async fn drive(&self, handle: &SessionHandle) -> Result<Completion, SessionError> {
        let inner = &self.inner;
        let cancel = handle.cancellation();
        let spec = handle.spec();

        let dataset = until_cancelled(&cancel, inner.datasets.resolve(&spec.dataset))
            .await??
            .ok_or_else(|| SessionError::DatasetNotFound(spec.dataset.clone()))?;
        dataset.check_shape()?;
        let split = DataSplit::fractional(dataset.sample_count(), inner.config.train_fraction)?;

        let mut job = inner
            .trainer
            .build(&spec.architecture)
            .map_err(SessionError::Construction)?;
        job.compile(&spec.hyperparameters)
            .map_err(SessionError::Construction)?;

        let options = FitOptions {
            epochs: spec
                .hyperparameters
                .epochs
                .unwrap_or(inner.config.default_epochs),
            batch_size: spec
                .hyperparameters
                .batch_size
                .unwrap_or(inner.config.default_batch_size),
        };

        if !handle.begin_training(&inner.channel, options.epochs) {
            return Err(SessionError::DeadlineExceeded);
        }
        tracing::info!(
            session_id = %handle.id(),
            epochs = options.epochs,
            train = split.train_len,
            validation = split.val_len,
            "Training started"
        );

        let history = self.fit(handle, job.as_mut(), dataset, split, options).await;
        let history = match history {
            Ok(history) => history,
            Err(e) => {
                job.cancel();
                return Err(e);
            }
        };

        let weights = job.export().map_err(SessionError::Fit)?;
        drop(job);

        let metadata = ModelMetadata {
            dataset: Some(spec.dataset.clone()),
            hyperparameters: Some(spec.hyperparameters.clone()),
            history,
        };
        let final_metrics = metadata.final_metrics().unwrap_or_default();
        let name = format!("Model_{}", Utc::now().to_rfc3339());
        // A save in progress runs to completion; the caller discards the
        // model if the session ended meanwhile.
        let model_id = inner
            .models
            .save(name, &spec.architecture, weights, metadata)
            .await?;

        Ok(Completion {
            model_id,
            final_metrics,
        })
    }

    async fn fit(
        &self,
        handle: &SessionHandle,
        job: &mut dyn TrainingJob,
        dataset: Dataset,
        split: DataSplit,
        options: FitOptions,
    ) -> Result<Vec<EpochRecord>, SessionError> {
        let cancel = handle.cancellation();
        let mut epochs = job
            .fit(dataset, split, options)
            .map_err(SessionError::Fit)?;
        let mut history = Vec::with_capacity(options.epochs as usize);

        while let Some(next) = until_cancelled(&cancel, epochs.next()).await? {
            let metrics = next.map_err(SessionError::Fit)?;
            let epoch = u32::try_from(history.len() + 1).unwrap_or(u32::MAX);
            if epoch > options.epochs {
                return Err(SessionError::Fit(TrainerError::Fit(format!(
                    "trainer produced more than {} epochs",
                    options.epochs
                ))));
            }

            let event = ProgressEvent::progress(epoch, options.epochs, metrics);
            if !handle.publish_if_active(&self.inner.channel, &event) {
                return Err(SessionError::DeadlineExceeded);
            }
            tracing::debug!(
                session_id = %handle.id(),
                epoch,
                loss = metrics.loss,
                "Epoch finished"
            );
            history.push(EpochRecord { epoch, metrics });
        }

        Ok(history)
    }

    /// Subscribe to a session's progress events.
    #[must_use]
    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        self.inner.channel.subscribe_stream(session_id)
    }

    /// The progress channel shared by every session.
    #[must_use]
    pub fn channel(&self) -> &Arc<ProgressChannel> {
        &self.inner.channel
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        self.inner.registry.get(session_id)
    }

    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.registry.list()
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// End every live session with a `shutdown` error and stop its work.
    ///
    /// Returns the number of sessions that were ended.
    pub fn shutdown(&self) -> usize {
        let event = ProgressEvent::Error {
            kind: FailureKind::Shutdown,
            message: "Server shutting down".to_string(),
        };
        let mut ended = 0;
        for snapshot in self.inner.registry.list() {
            let Some(handle) = self.inner.registry.handle(snapshot.id) else {
                continue;
            };
            self.inner.watchdog.disarm(snapshot.id);
            if handle.finish(&self.inner.channel, SessionStatus::Failed, &event) {
                ended += 1;
            }
            self.inner.registry.remove(snapshot.id);
            handle.cancel();
        }
        tracing::info!(sessions = ended, "Orchestrator shut down");
        ended
    }
}

/// Await `fut` unless the session is cancelled first.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, SessionError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SessionError::DeadlineExceeded),
        out = fut => Ok(out),
    }
}
