//! Storage implementations.

pub mod catalog;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryDatasetStore, MemoryModelStore};
