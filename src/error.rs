use thiserror::Error;

/// Errors raised by the pattern container and its mask/label operations.
///
/// These are data-contract violations, never transient failures: callers
/// should treat them as fatal for the container being processed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MvpError {
    /// A secondary mask index does not match the active voxel count.
    #[error("Shape of new index ({new}) is not the same as the current pattern ({current})!")]
    DimensionMismatch { new: usize, current: usize },

    /// An operation was called before the fields it needs were populated.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Active mask voxels and pattern columns disagree.
    #[error("mask has {mask} active voxels but patterns have {features} features")]
    FeatureMismatch { mask: usize, features: usize },

    /// Condition labels and pattern rows disagree.
    #[error("{labels} condition labels but {samples} pattern rows")]
    SampleMismatch { labels: usize, samples: usize },

    /// A flattened mask index does not fit its spatial shape.
    #[error("mask index has {len} entries but shape {shape:?} holds {expected}")]
    MaskShape {
        len: usize,
        shape: Vec<usize>,
        expected: usize,
    },

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MvpError>;
