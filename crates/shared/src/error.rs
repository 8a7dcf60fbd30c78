use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    Volume,
    Dim,
    Data,
}

/// A volume payload that cannot back a viewer layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("invalid volume specification: missing {0:?}")]
    Missing(PayloadField),
    #[error("invalid volume specification: dim must have 3 positive extents, got {0:?}")]
    BadDim(Vec<usize>),
    #[error("invalid volume specification: expected {expected} samples for dim {dim:?}, got {actual}")]
    SampleCount {
        dim: [usize; 3],
        expected: usize,
        actual: usize,
    },
    #[error("invalid volume specification: spacing must be finite and non-zero, got {0:?}")]
    BadSpacing([f64; 3]),
}
