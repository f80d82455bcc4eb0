//! Session orchestration for training jobs.
//!
//! Provides:
//! - `SessionRegistry` - Live sessions keyed by id
//! - `Watchdog` - Per-session deadlines
//! - `Orchestrator` - Drive a session from request to terminal event
//! - `ModelService` - Load stored models and run inference
//! - Storage implementations (memory)

pub mod orchestrator;
pub mod predict;
pub mod registry;
pub mod storage;
pub mod watchdog;

pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionError};
pub use predict::{ModelError, ModelService, Prediction};
pub use registry::{SessionHandle, SessionRegistry, SessionSnapshot};
pub use watchdog::Watchdog;
