//! Dense feed-forward trainer.
//!
//! Provides:
//! - `DenseTrainer` - builds trainable sequential models and restores saved ones
//! - Forward/backward passes for dense and dropout layers
//! - SGD and Adam optimizers

pub mod dense;
pub mod loss;
pub mod network;
pub mod optimizer;

pub use dense::{DenseJob, DensePredictor, DenseTrainer};
pub use network::{Network, NetworkWeights};
pub use optimizer::OptimizerState;
