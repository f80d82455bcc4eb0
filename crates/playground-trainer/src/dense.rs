//! `Trainer` implementation backed by [`Network`].

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use playground_core::{
    Architecture, DataSplit, Dataset, EpochMetrics, Hyperparameters, ModelWeights, Predictor,
    Trainer, TrainerError, TrainingJob,
    request::{Activation, Loss, Optimizer},
    traits::{EpochStream, FitOptions, Inference},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    loss,
    network::{Network, NetworkWeights},
    optimizer::OptimizerState,
};

/// Builds [`DenseJob`]s and restores [`DensePredictor`]s.
#[derive(Debug, Clone, Default)]
pub struct DenseTrainer {
    seed: Option<u64>,
}

impl DenseTrainer {
    /// Trainer with randomly seeded weight initialization and shuffling.
    #[must_use]
    pub const fn new() -> Self {
        Self { seed: None }
    }

    /// Trainer whose jobs are reproducible for a given seed.
    #[must_use]
    pub const fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn rng(&self) -> StdRng {
        self.seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }
}

impl Trainer for DenseTrainer {
    fn build(&self, architecture: &Architecture) -> Result<Box<dyn TrainingJob>, TrainerError> {
        let mut rng = self.rng();
        let network = Network::build(architecture, &mut rng)?;
        tracing::debug!(
            inputs = network.input_width(),
            outputs = network.output_width(),
            layers = architecture.layers.len(),
            "Model built"
        );
        Ok(Box::new(DenseJob {
            network: Arc::new(Mutex::new(network)),
            settings: None,
            shuffle_seed: rng.r#gen(),
            cancel: CancellationToken::new(),
        }))
    }

    fn restore(
        &self,
        architecture: &Architecture,
        weights: &ModelWeights,
    ) -> Result<Box<dyn Predictor>, TrainerError> {
        let stored: NetworkWeights = serde_json::from_value(weights.0.clone())
            .map_err(|e| TrainerError::Construction(format!("unreadable weights: {e}")))?;
        let mut network = Network::build(architecture, &mut StdRng::seed_from_u64(0))?;
        network.load(stored)?;
        Ok(Box::new(DensePredictor { network }))
    }
}

#[derive(Debug, Clone, Copy)]
struct FitSettings {
    loss: Loss,
    optimizer: Optimizer,
    learning_rate: Option<f64>,
    accuracy: bool,
}

/// One network being trained.
///
/// Fitting runs on the blocking pool; epochs are handed over through a
/// channel of capacity one, so the trainer never runs more than one epoch
/// ahead of its consumer.
pub struct DenseJob {
    network: Arc<Mutex<Network>>,
    settings: Option<FitSettings>,
    shuffle_seed: u64,
    cancel: CancellationToken,
}

impl TrainingJob for DenseJob {
    fn compile(&mut self, hyperparameters: &Hyperparameters) -> Result<(), TrainerError> {
        if let Some(rate) = hyperparameters.learning_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(TrainerError::Construction(format!(
                    "learning rate must be positive, got {rate}"
                )));
            }
        }
        self.settings = Some(FitSettings {
            loss: hyperparameters.loss,
            optimizer: hyperparameters.optimizer,
            learning_rate: hyperparameters.learning_rate,
            accuracy: hyperparameters.wants_accuracy(),
        });
        Ok(())
    }

    /// Must be called within a Tokio runtime.
    fn fit(
        &mut self,
        data: Dataset,
        split: DataSplit,
        options: FitOptions,
    ) -> Result<EpochStream, TrainerError> {
        let settings = self
            .settings
            .ok_or_else(|| TrainerError::Fit("model must be compiled before fitting".to_string()))?;

        {
            let network = self.network.lock();
            if data.input_width() != network.input_width() {
                return Err(TrainerError::Fit(format!(
                    "dataset has {} input values per sample, model expects {}",
                    data.input_width(),
                    network.input_width()
                )));
            }
            if data.output_width() != network.output_width() {
                return Err(TrainerError::Fit(format!(
                    "dataset has {} output values per sample, model produces {}",
                    data.output_width(),
                    network.output_width()
                )));
            }
        }
        if split.train_len == 0 || split.train_len + split.val_len != data.sample_count() {
            return Err(TrainerError::Fit(format!(
                "split {}+{} does not cover {} samples",
                split.train_len,
                split.val_len,
                data.sample_count()
            )));
        }
        if options.batch_size == 0 {
            return Err(TrainerError::Fit("batch size must be at least 1".to_string()));
        }

        let (tx, rx) = mpsc::channel(1);
        let network = Arc::clone(&self.network);
        let cancel = self.cancel.clone();
        let mut rng = StdRng::seed_from_u64(self.shuffle_seed);

        tokio::task::spawn_blocking(move || {
            let mut optimizer = OptimizerState::new(settings.optimizer, settings.learning_rate);
            let mut order: Vec<usize> = (0..split.train_len).collect();

            for epoch in 1..=options.epochs {
                let metrics = {
                    let mut network = network.lock();
                    run_epoch(
                        &mut network,
                        &mut optimizer,
                        &data,
                        split,
                        options.batch_size,
                        settings,
                        &mut order,
                        &mut rng,
                        &cancel,
                    )
                };
                let Some(metrics) = metrics else {
                    tracing::debug!(epoch, "Fit cancelled");
                    return;
                };

                if !metrics.loss.is_finite() {
                    let _ = tx.blocking_send(Err(TrainerError::Fit(format!(
                        "loss became non-finite at epoch {epoch}"
                    ))));
                    return;
                }
                if tx.blocking_send(Ok(metrics)).is_err() {
                    tracing::debug!(epoch, "Epoch consumer went away");
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn export(&self) -> Result<ModelWeights, TrainerError> {
        let weights = self.network.lock().export();
        serde_json::to_value(weights)
            .map(ModelWeights)
            .map_err(|e| TrainerError::Fit(format!("failed to serialize weights: {e}")))
    }
}

impl Drop for DenseJob {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Train for one epoch, then evaluate on the validation part.
///
/// Returns `None` if cancelled between batches.
#[allow(clippy::too_many_arguments, clippy::cast_precision_loss)]
fn run_epoch(
    network: &mut Network,
    optimizer: &mut OptimizerState,
    data: &Dataset,
    split: DataSplit,
    batch_size: usize,
    settings: FitSettings,
    order: &mut [usize],
    rng: &mut StdRng,
    cancel: &CancellationToken,
) -> Option<EpochMetrics> {
    order.shuffle(rng);

    let mut loss_sum = 0.0;
    let mut correct = 0_usize;
    for batch in order.chunks(batch_size) {
        if cancel.is_cancelled() {
            return None;
        }
        let mut grads = network.zero_gradients();
        for &i in batch {
            let (predicted, sample_loss) = network.accumulate(
                &data.inputs[i],
                &data.outputs[i],
                settings.loss,
                Some(&mut *rng),
                &mut grads,
            );
            loss_sum += sample_loss;
            if loss::is_correct(&predicted, &data.outputs[i]) {
                correct += 1;
            }
        }
        network.apply(&grads, optimizer, 1.0 / batch.len() as f64);
    }

    let n = split.train_len as f64;
    let mut metrics = EpochMetrics {
        loss: loss_sum / n,
        accuracy: settings.accuracy.then(|| correct as f64 / n),
        ..Default::default()
    };

    if split.val_len > 0 {
        let mut val_loss = 0.0;
        let mut val_correct = 0_usize;
        for i in split.train_len..data.sample_count() {
            let predicted = network.predict(&data.inputs[i]);
            val_loss += loss::value(settings.loss, &predicted, &data.outputs[i]);
            if loss::is_correct(&predicted, &data.outputs[i]) {
                val_correct += 1;
            }
        }
        let n = split.val_len as f64;
        metrics.val_loss = Some(val_loss / n);
        metrics.val_accuracy = settings.accuracy.then(|| val_correct as f64 / n);
    }

    Some(metrics)
}

/// A restored network serving predictions.
#[derive(Debug)]
pub struct DensePredictor {
    network: Network,
}

impl Predictor for DensePredictor {
    fn input_width(&self) -> usize {
        self.network.input_width()
    }

    fn predict(&self, inputs: &[f64]) -> Result<Inference, TrainerError> {
        if inputs.len() != self.network.input_width() {
            return Err(TrainerError::ShapeMismatch {
                expected: self.network.input_width(),
                actual: inputs.len(),
            });
        }
        if !inputs.iter().all(|v| v.is_finite()) {
            return Err(TrainerError::Inference("inputs must be finite".to_string()));
        }

        let output = self.network.predict(inputs);
        if !output.iter().all(|v| v.is_finite()) {
            return Err(TrainerError::Inference(
                "model produced a non-finite output".to_string(),
            ));
        }
        let confidence =
            (self.network.output_activation() == Activation::Softmax).then(|| output.clone());
        Ok(Inference { output, confidence })
    }
}
