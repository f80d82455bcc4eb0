use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use playground_core::{
    Architecture, DataSplit, Dataset, DatasetRef, EpochMetrics, FailureKind, Hyperparameters,
    ModelArtifact, ModelId, ModelMetadata, ModelStore, ModelSummary, ModelWeights, Predictor,
    ProgressEvent, SessionStatus, TrainRequest, Trainer, TrainerError, TrainingJob,
    ValidationError,
    request::{Activation, LayerSpec},
    traits::{EpochStream, FitOptions, StoreError},
};
use playground_session::{
    Orchestrator, OrchestratorConfig,
    storage::{MemoryDatasetStore, MemoryModelStore},
};
use serde_json::json;
use tokio_test::{assert_pending, task};

#[derive(Clone, Copy)]
enum Script {
    /// Yield every requested epoch.
    Complete,
    /// Yield one epoch, then never finish.
    Hang,
    /// Fail while yielding this 1-based epoch.
    FailAt(u32),
    /// Yield one epoch more than requested.
    Overrun,
    /// Panic while producing the first epoch.
    Panic,
    /// Refuse to build.
    BadArchitecture,
}

struct ScriptedTrainer {
    script: Script,
    cancels: Arc<AtomicUsize>,
    fits: Arc<AtomicUsize>,
}

impl ScriptedTrainer {
    fn new(script: Script) -> Self {
        Self {
            script,
            cancels: Arc::new(AtomicUsize::new(0)),
            fits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedJob {
    script: Script,
    cancels: Arc<AtomicUsize>,
    fits: Arc<AtomicUsize>,
}

fn metrics(epoch: u32) -> EpochMetrics {
    EpochMetrics {
        loss: 1.0 / f64::from(epoch),
        accuracy: Some(0.5),
        val_loss: None,
        val_accuracy: None,
    }
}

impl TrainingJob for ScriptedJob {
    fn compile(&mut self, _: &Hyperparameters) -> Result<(), TrainerError> {
        Ok(())
    }

    fn fit(
        &mut self,
        data: Dataset,
        split: DataSplit,
        options: FitOptions,
    ) -> Result<EpochStream, TrainerError> {
        assert_eq!(split.train_len + split.val_len, data.sample_count());
        self.fits.fetch_add(1, Ordering::SeqCst);
        let stream = match self.script {
            Script::Complete => stream::iter((1..=options.epochs).map(|e| Ok(metrics(e)))).boxed(),
            Script::Hang => stream::iter([Ok(metrics(1))])
                .chain(stream::pending())
                .boxed(),
            Script::FailAt(n) => stream::iter((1..=options.epochs).map(move |e| {
                if e == n {
                    Err(TrainerError::Fit("loss diverged".into()))
                } else {
                    Ok(metrics(e))
                }
            }))
            .boxed(),
            Script::Overrun => {
                stream::iter((1..=options.epochs + 1).map(|e| Ok(metrics(e)))).boxed()
            }
            Script::Panic => stream::iter([1u32])
                .map(|epoch| -> Result<EpochMetrics, TrainerError> {
                    panic!("numerical backend crashed at epoch {epoch}")
                })
                .boxed(),
            Script::BadArchitecture => unreachable!(),
        };
        Ok(stream)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn export(&self) -> Result<ModelWeights, TrainerError> {
        Ok(ModelWeights(json!({"scripted": true})))
    }
}

impl Trainer for ScriptedTrainer {
    fn build(&self, _: &Architecture) -> Result<Box<dyn TrainingJob>, TrainerError> {
        if matches!(self.script, Script::BadArchitecture) {
            return Err(TrainerError::Construction("unsupported layer".into()));
        }
        Ok(Box::new(ScriptedJob {
            script: self.script,
            cancels: Arc::clone(&self.cancels),
            fits: Arc::clone(&self.fits),
        }))
    }

    fn restore(&self, _: &Architecture, _: &ModelWeights) -> Result<Box<dyn Predictor>, TrainerError> {
        Err(TrainerError::Construction("not used".into()))
    }
}

struct BrokenModelStore;

#[async_trait]
impl ModelStore for BrokenModelStore {
    async fn save(
        &self,
        _: String,
        _: &Architecture,
        _: ModelWeights,
        _: ModelMetadata,
    ) -> Result<ModelId, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn load(&self, _: ModelId) -> Result<Option<ModelArtifact>, StoreError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<ModelSummary>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _: ModelId) -> Result<Option<ModelSummary>, StoreError> {
        Ok(None)
    }
}

/// Commits immediately but acknowledges the write only after `delay`.
struct SlowAckModelStore {
    inner: MemoryModelStore,
    delay: Duration,
}

#[async_trait]
impl ModelStore for SlowAckModelStore {
    async fn save(
        &self,
        name: String,
        architecture: &Architecture,
        weights: ModelWeights,
        metadata: ModelMetadata,
    ) -> Result<ModelId, StoreError> {
        let id = self
            .inner
            .save(name, architecture, weights, metadata)
            .await?;
        tokio::time::sleep(self.delay).await;
        Ok(id)
    }

    async fn load(&self, id: ModelId) -> Result<Option<ModelArtifact>, StoreError> {
        self.inner.load(id).await
    }

    async fn list(&self) -> Result<Vec<ModelSummary>, StoreError> {
        self.inner.list().await
    }

    async fn delete(&self, id: ModelId) -> Result<Option<ModelSummary>, StoreError> {
        self.inner.delete(id).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    models: Arc<MemoryModelStore>,
    cancels: Arc<AtomicUsize>,
    fits: Arc<AtomicUsize>,
}

fn harness(script: Script, config: OrchestratorConfig) -> Harness {
    let trainer = ScriptedTrainer::new(script);
    let cancels = Arc::clone(&trainer.cancels);
    let fits = Arc::clone(&trainer.fits);
    let models = Arc::new(MemoryModelStore::new());
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryDatasetStore::new()),
        models.clone(),
        Arc::new(trainer),
        config,
    );
    Harness {
        orchestrator,
        models,
        cancels,
        fits,
    }
}

fn request(dataset: &str, epochs: u32) -> TrainRequest {
    TrainRequest::new(
        Architecture {
            input_shape: vec![2],
            layers: vec![
                LayerSpec::Dense {
                    units: 4,
                    activation: Activation::Relu,
                },
                LayerSpec::Dense {
                    units: 1,
                    activation: Activation::Sigmoid,
                },
            ],
        },
        DatasetRef::from(dataset),
        Hyperparameters {
            epochs: Some(epochs),
            ..Default::default()
        },
    )
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_xor_session_streams_progress_then_completes() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 3)).unwrap();
    let sub = h.orchestrator.subscribe(id);
    assert!(sub.id.is_some());

    let events: Vec<ProgressEvent> = sub.stream.collect().await;
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], ProgressEvent::Started { total_epochs: 3 });
    for (i, event) in events[1..4].iter().enumerate() {
        let expected = u32::try_from(i).unwrap() + 1;
        match event {
            ProgressEvent::Progress {
                epoch,
                total_epochs,
                metrics: m,
                ..
            } => {
                assert_eq!(*epoch, expected);
                assert_eq!(*total_epochs, 3);
                assert_eq!(*m, metrics(expected));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }
    let ProgressEvent::Complete {
        model_id,
        final_metrics,
    } = &events[4]
    else {
        panic!("expected complete, got {:?}", events[4]);
    };
    assert_eq!(*final_metrics, metrics(3));

    assert!(h.orchestrator.session(id).is_none());
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.orchestrator.channel().topic_count(), 0);

    let stored = h.models.load(*model_id).await.unwrap().unwrap();
    assert_eq!(stored.metadata.history.len(), 3);
    assert_eq!(stored.metadata.dataset, Some(DatasetRef::from("xor")));
    assert!(stored.name.starts_with("Model_"));
    assert_eq!(h.cancels.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_id_is_returned_before_any_event() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 2)).unwrap();

    assert_eq!(
        h.orchestrator.session(id).map(|s| s.status),
        Some(SessionStatus::Initializing)
    );

    let mut sub = h.orchestrator.subscribe(id);
    let mut next = task::spawn(sub.stream.next());
    assert_pending!(next.poll());
    drop(next);

    let first = sub.stream.next().await;
    assert_eq!(first, Some(ProgressEvent::Started { total_epochs: 2 }));
}

#[tokio::test]
async fn test_missing_dataset_fails_without_progress() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let id = h
        .orchestrator
        .start_training(request("does-not-exist", 3))
        .unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        ProgressEvent::Error { kind, message } => {
            assert_eq!(*kind, FailureKind::DatasetNotFound);
            assert!(message.contains("does-not-exist"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.fits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out_and_cancels_trainer() {
    let config = OrchestratorConfig {
        session_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let h = harness(Script::Hang, config);
    let id = h.orchestrator.start_training(request("xor", 10)).unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    let kinds: Vec<_> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["started", "progress", "timeout"]);
    assert!(matches!(
        events[2],
        ProgressEvent::Timeout { elapsed_secs: 1, .. }
    ));

    wait_for(|| h.cancels.load(Ordering::SeqCst) == 1).await;
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.models.is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_synchronously() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let err = h
        .orchestrator
        .start_training(TrainRequest {
            dataset: Some(DatasetRef::from("xor")),
            ..Default::default()
        })
        .unwrap_err();

    assert_eq!(
        err,
        ValidationError::Missing(vec!["architecture", "hyperparameters"])
    );
    assert!(h.orchestrator.registry().is_empty());
    assert_eq!(h.orchestrator.channel().topic_count(), 0);
}

#[tokio::test]
async fn test_construction_error_is_reported() {
    let h = harness(Script::BadArchitecture, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 3)).unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    assert!(matches!(
        events.as_slice(),
        [ProgressEvent::Error {
            kind: FailureKind::TrainerConstruction,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_fit_error_after_progress() {
    let h = harness(Script::FailAt(2), OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("iris", 5)).unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    let kinds: Vec<_> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["started", "progress", "error"]);
    match events.last() {
        Some(ProgressEvent::Error { kind, message }) => {
            assert_eq!(*kind, FailureKind::Fit);
            assert!(message.contains("loss diverged"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(h.cancels.load(Ordering::SeqCst), 1);
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.models.is_empty());
}

#[tokio::test]
async fn test_persistence_error_is_reported() {
    let trainer = Arc::new(ScriptedTrainer::new(Script::Complete));
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryDatasetStore::new()),
        Arc::new(BrokenModelStore),
        trainer,
        OrchestratorConfig::default(),
    );
    let id = orchestrator.start_training(request("xor", 2)).unwrap();
    let events: Vec<_> = orchestrator.subscribe(id).stream.collect().await;

    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Error {
            kind: FailureKind::Persistence,
            ..
        })
    ));
    assert!(orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_invalid_dataset_is_reported() {
    let datasets = Arc::new(MemoryDatasetStore::new());
    let tiny = playground_core::DatasetStore::insert(
        datasets.as_ref(),
        "one".into(),
        playground_core::DatasetKind::Regression,
        Dataset::new(vec![vec![1.0, 2.0]], vec![vec![3.0]]),
    )
    .await
    .unwrap();
    let orchestrator = Orchestrator::new(
        datasets,
        Arc::new(MemoryModelStore::new()),
        Arc::new(ScriptedTrainer::new(Script::Complete)),
        OrchestratorConfig::default(),
    );

    let id = orchestrator
        .start_training(request(tiny.as_str(), 2))
        .unwrap();
    let events: Vec<_> = orchestrator.subscribe(id).stream.collect().await;
    assert!(matches!(
        events.as_slice(),
        [ProgressEvent::Error {
            kind: FailureKind::InvalidDataset,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let a = h.orchestrator.start_training(request("xor", 2)).unwrap();
    let b = h.orchestrator.start_training(request("boston", 4)).unwrap();
    assert_ne!(a, b);
    assert_eq!(h.orchestrator.active_sessions().len(), 2);

    let sub_a = h.orchestrator.subscribe(a);
    let sub_b = h.orchestrator.subscribe(b);
    let (events_a, events_b) = tokio::join!(
        sub_a.stream.collect::<Vec<_>>(),
        sub_b.stream.collect::<Vec<_>>()
    );

    assert_eq!(events_a.len(), 4);
    assert_eq!(events_b.len(), 6);
    assert!(events_a.last().is_some_and(ProgressEvent::is_terminal));
    assert!(events_b.last().is_some_and(ProgressEvent::is_terminal));
    assert_eq!(h.models.len(), 2);
}

#[tokio::test]
async fn test_late_subscriber_gets_nothing() {
    let h = harness(Script::Complete, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 1)).unwrap();
    let _ = h.orchestrator.subscribe(id).stream.collect::<Vec<_>>().await;

    let late = h.orchestrator.subscribe(id);
    assert!(late.id.is_none());
    assert!(late.stream.collect::<Vec<_>>().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_running_sessions() {
    let h = harness(Script::Hang, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 5)).unwrap();
    let mut sub = h.orchestrator.subscribe(id);

    assert_eq!(
        sub.stream.next().await,
        Some(ProgressEvent::Started { total_epochs: 5 })
    );
    assert!(matches!(
        sub.stream.next().await,
        Some(ProgressEvent::Progress { epoch: 1, .. })
    ));

    assert_eq!(h.orchestrator.shutdown(), 1);
    let rest: Vec<_> = sub.stream.collect().await;
    assert!(matches!(
        rest.as_slice(),
        [ProgressEvent::Error {
            kind: FailureKind::Shutdown,
            ..
        }]
    ));
    wait_for(|| h.cancels.load(Ordering::SeqCst) == 1).await;
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_model_saved_after_deadline_is_discarded() {
    let store = Arc::new(SlowAckModelStore {
        inner: MemoryModelStore::new(),
        delay: Duration::from_secs(5),
    });
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryDatasetStore::new()),
        store.clone(),
        Arc::new(ScriptedTrainer::new(Script::Complete)),
        OrchestratorConfig {
            session_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    );
    let id = orchestrator.start_training(request("xor", 2)).unwrap();
    let events: Vec<_> = orchestrator.subscribe(id).stream.collect().await;

    let kinds: Vec<_> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["started", "progress", "progress", "timeout"]);
    assert!(orchestrator.registry().is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    wait_for(|| store.inner.is_empty()).await;
}

#[tokio::test]
async fn test_extra_epochs_fail_the_session() {
    let h = harness(Script::Overrun, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 3)).unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    let kinds: Vec<_> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["started", "progress", "progress", "progress", "error"]);
    for event in &events {
        if let ProgressEvent::Progress {
            epoch, progress, ..
        } = event
        {
            assert!(*epoch <= 3);
            assert!(*progress <= 100.0);
        }
    }
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Error {
            kind: FailureKind::Fit,
            ..
        })
    ));
    assert_eq!(h.cancels.load(Ordering::SeqCst), 1);
    assert!(h.models.is_empty());
    assert!(h.orchestrator.registry().is_empty());
}

#[tokio::test]
async fn test_panicking_trainer_fails_the_session() {
    let h = harness(Script::Panic, OrchestratorConfig::default());
    let id = h.orchestrator.start_training(request("xor", 3)).unwrap();
    let events: Vec<_> = h.orchestrator.subscribe(id).stream.collect().await;

    let kinds: Vec<_> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["started", "error"]);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Error {
            kind: FailureKind::Fit,
            ..
        })
    ));
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.models.is_empty());
}
