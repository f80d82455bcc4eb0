//! In-memory dataset and model storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use playground_core::{
    Architecture, Dataset, DatasetKind, DatasetRef, DatasetStore, ModelArtifact, ModelId,
    ModelMetadata, ModelStore, ModelSummary, ModelWeights,
    dataset::{DatasetListing, DatasetSummary},
    traits::StoreError,
};
use uuid::Uuid;

use super::catalog::{BuiltinDataset, builtin_datasets};

struct StoredDataset {
    name: String,
    kind: DatasetKind,
    data: Dataset,
    created_at: DateTime<Utc>,
}

/// In-memory dataset storage seeded with the built-in catalogue.
///
/// Useful for development and single-process deployments.
/// Uploaded datasets are lost on restart.
pub struct MemoryDatasetStore {
    builtins: Vec<BuiltinDataset>,
    custom: RwLock<HashMap<Uuid, StoredDataset>>,
}

impl MemoryDatasetStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            builtins: builtin_datasets(),
            custom: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn resolve(&self, dataset: &DatasetRef) -> Result<Option<Dataset>, StoreError> {
        if let Some(builtin) = self.builtins.iter().find(|b| b.key == dataset.as_str()) {
            return Ok(Some(builtin.data.clone()));
        }
        Ok(dataset
            .as_uuid()
            .and_then(|id| self.custom.read().get(&id).map(|d| d.data.clone())))
    }

    async fn list(&self) -> Result<DatasetListing, StoreError> {
        let mut custom: Vec<DatasetSummary> = self
            .custom
            .read()
            .iter()
            .map(|(id, d)| DatasetSummary {
                id: id.to_string(),
                name: d.name.clone(),
                kind: d.kind,
                metadata: d.data.metadata(),
                created_at: Some(d.created_at),
            })
            .collect();

        // Newest first
        custom.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(DatasetListing {
            prebuilt: self.builtins.iter().map(BuiltinDataset::summary).collect(),
            custom,
        })
    }

    async fn insert(
        &self,
        name: String,
        kind: DatasetKind,
        dataset: Dataset,
    ) -> Result<DatasetRef, StoreError> {
        let id = Uuid::new_v4();
        self.custom.write().insert(
            id,
            StoredDataset {
                name,
                kind,
                data: dataset,
                created_at: Utc::now(),
            },
        );
        Ok(DatasetRef::from(id))
    }
}

/// In-memory model storage.
#[derive(Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<ModelId, ModelArtifact>>,
}

impl MemoryModelStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn save(
        &self,
        name: String,
        architecture: &Architecture,
        weights: ModelWeights,
        metadata: ModelMetadata,
    ) -> Result<ModelId, StoreError> {
        let id = Uuid::new_v4();
        let artifact = ModelArtifact {
            id,
            name,
            architecture: architecture.clone(),
            weights,
            metadata,
            created_at: Utc::now(),
        };
        self.models.write().insert(id, artifact);
        Ok(id)
    }

    async fn load(&self, id: ModelId) -> Result<Option<ModelArtifact>, StoreError> {
        Ok(self.models.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ModelSummary>, StoreError> {
        let mut result: Vec<ModelSummary> =
            self.models.read().values().map(ModelArtifact::summary).collect();

        // Sort by created_at descending
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(result)
    }

    async fn delete(&self, id: ModelId) -> Result<Option<ModelSummary>, StoreError> {
        Ok(self.models.write().remove(&id).map(|m| m.summary()))
    }
}

#[cfg(test)]
mod tests {
    use playground_core::request::{Activation, LayerSpec};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_resolves_builtin_and_custom() {
        let store = MemoryDatasetStore::new();
        let xor = store.resolve(&DatasetRef::from("xor")).await.unwrap().unwrap();
        assert_eq!(xor.sample_count(), 4);

        let data = Dataset::new(vec![vec![1.0], vec![2.0]], vec![vec![2.0], vec![4.0]]);
        let id = store
            .insert("doubling".into(), DatasetKind::Regression, data.clone())
            .await
            .unwrap();
        assert_eq!(store.resolve(&id).await.unwrap(), Some(data));

        let listing = store.list().await.unwrap();
        assert_eq!(listing.prebuilt.len(), 4);
        assert_eq!(listing.custom.len(), 1);
        assert_eq!(listing.custom[0].name, "doubling");
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_none() {
        let store = MemoryDatasetStore::new();
        assert!(store.resolve(&DatasetRef::from("nope")).await.unwrap().is_none());
        assert!(
            store
                .resolve(&DatasetRef::from(Uuid::new_v4()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_model_crud() {
        let store = MemoryModelStore::new();
        let arch = Architecture {
            input_shape: vec![1],
            layers: vec![LayerSpec::Dense {
                units: 1,
                activation: Activation::Linear,
            }],
        };
        let id = store
            .save(
                "m".into(),
                &arch,
                ModelWeights(json!({"layers": []})),
                ModelMetadata::default(),
            )
            .await
            .unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "m");
        assert_eq!(loaded.architecture, arch);
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert_eq!(store.delete(id).await.unwrap().map(|s| s.id), Some(id));
        assert!(store.delete(id).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
