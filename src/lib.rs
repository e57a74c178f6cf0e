//! Multivoxel pattern container for first-level fMRI analyses.
//!
//! An [`Mvp`] binds a trials × voxels pattern matrix to its condition labels
//! and to the voxel mask needed to put the patterns back into brain space.

pub mod config;
pub mod data;
pub mod error;

pub use config::{MvpConfig, ReferenceSpace};
pub use data::labels::LabelMetadata;
pub use data::loader::{MaskVolume, PatternTable, load_mask, load_mvp, load_patterns, populate};
pub use data::mask::{MaskValue, VoxelMask};
pub use data::model::{MetadataValue, Mvp, MvpSummary, SpatialHeader};
pub use error::{MvpError, Result};
