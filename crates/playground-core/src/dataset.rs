//! Datasets, dataset references and the train/validation split.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Reference to a dataset: a built-in key such as `xor`, or a persisted id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRef(String);

impl DatasetRef {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the reference as a persisted dataset id.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(self.0.trim()).ok()
    }
}

impl From<&str> for DatasetRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DatasetRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Uuid> for DatasetRef {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Problem type a dataset is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Classification,
    Regression,
}

/// Paired input/output samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub inputs: Vec<Vec<f64>>,
    pub outputs: Vec<Vec<f64>>,
}

/// Dataset shape problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("Dataset is empty")]
    Empty,
    #[error("Dataset has {inputs} inputs but {outputs} outputs")]
    LengthMismatch { inputs: usize, outputs: usize },
    #[error("Row {row} has width {actual}, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("At least 2 samples are required for a train/validation split, got {0}")]
    TooSmall(usize),
}

impl Dataset {
    #[must_use]
    pub fn new(inputs: Vec<Vec<f64>>, outputs: Vec<Vec<f64>>) -> Self {
        Self { inputs, outputs }
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn input_width(&self) -> usize {
        self.inputs.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn output_width(&self) -> usize {
        self.outputs.first().map_or(0, Vec::len)
    }

    /// Check that the dataset is non-empty and rectangular.
    ///
    /// # Errors
    /// Returns the first shape problem found.
    pub fn check_shape(&self) -> Result<(), DatasetError> {
        if self.inputs.is_empty() {
            return Err(DatasetError::Empty);
        }
        if self.inputs.len() != self.outputs.len() {
            return Err(DatasetError::LengthMismatch {
                inputs: self.inputs.len(),
                outputs: self.outputs.len(),
            });
        }
        for rows in [&self.inputs, &self.outputs] {
            let expected = rows[0].len();
            if let Some((row, r)) = rows
                .iter()
                .enumerate()
                .find(|(_, r)| r.len() != expected || r.is_empty())
            {
                return Err(DatasetError::Ragged {
                    row,
                    expected,
                    actual: r.len(),
                });
            }
        }
        Ok(())
    }

    /// Shape summary used by dataset listings.
    #[must_use]
    pub fn metadata(&self) -> DatasetMetadata {
        DatasetMetadata {
            input_shape: vec![self.input_width()],
            output_shape: vec![self.output_width()],
            samples: self.sample_count(),
            classes: None,
        }
    }
}

/// Partition of a dataset into a leading training part and a trailing
/// validation part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train_len: usize,
    pub val_len: usize,
}

impl DataSplit {
    /// Split at `floor(samples * train_fraction)`, keeping at least one sample
    /// on each side.
    ///
    /// # Errors
    /// Returns `TooSmall` with fewer than two samples.
    pub fn fractional(samples: usize, train_fraction: f64) -> Result<Self, DatasetError> {
        if samples < 2 {
            return Err(DatasetError::TooSmall(samples));
        }
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let floor = (samples as f64 * train_fraction).floor() as usize;
        let train_len = floor.clamp(1, samples - 1);
        Ok(Self {
            train_len,
            val_len: samples - train_len,
        })
    }
}

/// Shape summary of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
}

/// Listing entry for a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    /// Built-in key or persisted id.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DatasetKind,
    pub metadata: DatasetMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Built-in and persisted datasets, listed separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetListing {
    pub prebuilt: Vec<DatasetSummary>,
    pub custom: Vec<DatasetSummary>,
}
