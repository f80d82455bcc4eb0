//! Built-in datasets available under fixed keys.

use playground_core::{
    Dataset, DatasetKind,
    dataset::{DatasetMetadata, DatasetSummary},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// A dataset shipped with the server.
pub struct BuiltinDataset {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: DatasetKind,
    pub data: Dataset,
    pub classes: Option<Vec<String>>,
}

impl BuiltinDataset {
    #[must_use]
    pub fn summary(&self) -> DatasetSummary {
        let mut metadata: DatasetMetadata = self.data.metadata();
        metadata.classes.clone_from(&self.classes);
        DatasetSummary {
            id: self.key.to_string(),
            name: self.name.to_string(),
            kind: self.kind,
            metadata,
            created_at: None,
        }
    }
}

fn rows<const N: usize>(rows: &[[f64; N]]) -> Vec<Vec<f64>> {
    rows.iter().map(|r| r.to_vec()).collect()
}

fn xor() -> BuiltinDataset {
    BuiltinDataset {
        key: "xor",
        name: "XOR Problem",
        kind: DatasetKind::Classification,
        data: Dataset::new(
            rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]),
            rows(&[[0.0], [1.0], [1.0], [0.0]]),
        ),
        classes: None,
    }
}

fn iris() -> BuiltinDataset {
    BuiltinDataset {
        key: "iris",
        name: "Iris Dataset",
        kind: DatasetKind::Classification,
        data: Dataset::new(
            rows(&[
                [5.1, 3.5, 1.4, 0.2],
                [4.9, 3.0, 1.4, 0.2],
                [6.2, 3.4, 5.4, 2.3],
                [5.9, 3.0, 5.1, 1.8],
                [7.0, 3.2, 4.7, 1.4],
                [6.4, 3.2, 4.5, 1.5],
                [6.9, 3.1, 4.9, 1.5],
                [5.5, 2.3, 4.0, 1.3],
                [6.5, 2.8, 4.6, 1.5],
                [5.7, 2.8, 4.5, 1.3],
                [6.3, 3.3, 6.0, 2.5],
                [5.8, 2.7, 5.1, 1.9],
            ]),
            rows(&[
                [1.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, 1.0],
            ]),
        ),
        classes: Some(vec![
            "Setosa".to_string(),
            "Versicolor".to_string(),
            "Virginica".to_string(),
        ]),
    }
}

fn boston() -> BuiltinDataset {
    BuiltinDataset {
        key: "boston",
        name: "Boston Housing (Subset)",
        kind: DatasetKind::Regression,
        data: Dataset::new(
            rows(&[
                [0.00632, 18.0, 2.31, 0.0, 0.538, 6.575, 65.2, 4.0900],
                [0.02731, 0.0, 7.07, 0.0, 0.469, 6.421, 78.9, 4.9671],
                [0.02729, 0.0, 7.07, 0.0, 0.469, 7.185, 61.1, 4.9671],
                [0.03237, 0.0, 2.18, 0.0, 0.458, 6.998, 45.8, 6.0622],
                [0.06905, 0.0, 2.18, 0.0, 0.458, 7.147, 54.2, 6.0622],
            ]),
            rows(&[[24.0], [21.6], [34.7], [33.4], [36.2]]),
        ),
        classes: None,
    }
}

/// Synthetic 28x28 "digits": low-intensity noise with cycling one-hot labels.
fn mnist() -> BuiltinDataset {
    const SAMPLES: usize = 100;
    const PIXELS: usize = 28 * 28;
    const CLASSES: usize = 10;

    let mut rng = StdRng::seed_from_u64(0x6d6e_6973);
    let mut inputs = Vec::with_capacity(SAMPLES);
    let mut outputs = Vec::with_capacity(SAMPLES);
    for i in 0..SAMPLES {
        inputs.push((0..PIXELS).map(|_| rng.gen_range(0.0..0.1)).collect());
        let mut one_hot = vec![0.0; CLASSES];
        one_hot[i % CLASSES] = 1.0;
        outputs.push(one_hot);
    }

    BuiltinDataset {
        key: "mnist",
        name: "MNIST Digits (Subset)",
        kind: DatasetKind::Classification,
        data: Dataset::new(inputs, outputs),
        classes: None,
    }
}

/// Every built-in dataset, in listing order.
#[must_use]
pub fn builtin_datasets() -> Vec<BuiltinDataset> {
    vec![xor(), iris(), boston(), mnist()]
}
