use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};
use serde::Serialize;

use super::labels::LabelMetadata;
use super::mask::{MaskValue, VoxelMask};
use crate::config::{MvpConfig, ReferenceSpace};
use crate::error::{MvpError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – a single spatial header entry
// ---------------------------------------------------------------------------

/// A dynamically-typed header value (dims, pixdim, description, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<MetadataValue>),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

/// Opaque spatial header, carried through unchanged.
pub type SpatialHeader = BTreeMap<String, MetadataValue>;

// ---------------------------------------------------------------------------
// Path parsing
// ---------------------------------------------------------------------------

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Subject name: the directory that contains the run directory.
pub fn parse_sub_name(directory: &Path) -> String {
    directory.parent().map(file_name_of).unwrap_or_default()
}

/// Run name: last `_` token of the directory name, cut at its first `.`.
///
/// `/data/sub001/run_wm_2.feat` → `2`.
pub fn parse_run_name(directory: &Path) -> String {
    let base = file_name_of(directory);
    let stem = base.split('.').next().unwrap_or_default();
    stem.rsplit('_').next().unwrap_or_default().to_string()
}

/// Mask name: the directory holding the mask, or `WholeBrain` without one.
pub fn parse_mask_name(mask_path: Option<&Path>) -> String {
    match mask_path {
        Some(p) => p.parent().map(file_name_of).unwrap_or_default(),
        None => "WholeBrain".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Mvp – the multivoxel pattern container
// ---------------------------------------------------------------------------

/// Multivoxel pattern container for one (subject, run) directory.
///
/// Holds the patterns `x` (trials × voxels), their condition labels and the
/// mask that maps columns of `x` back to voxels of the volume.
///
/// Invariants, whenever the fields involved are set:
/// * labels, encoded labels and rows of `x` have equal length;
/// * the mask's active voxel count equals the number of columns of `x`.
///
/// [`Mvp::update_mask`] narrows the mask only; callers then select the same
/// columns of `x`, or use [`Mvp::update_mask_and_patterns`] to do both.
#[derive(Debug, Clone)]
pub struct Mvp {
    directory: PathBuf,
    sub_name: String,
    run_name: String,
    mask_name: String,
    config: MvpConfig,

    cope_labels: Option<Vec<String>>,
    metadata: Option<LabelMetadata>,
    mask: Option<VoxelMask>,
    header: Option<SpatialHeader>,
    affine: Option<Array2<f64>>,
    x: Option<Array2<f64>>,
}

impl Mvp {
    /// A bare container: identity parsed from `directory`, no data yet.
    pub fn new(directory: impl Into<PathBuf>, config: MvpConfig) -> Self {
        let directory = directory.into();
        let sub_name = parse_sub_name(&directory);
        let run_name = parse_run_name(&directory);
        let mask_name = parse_mask_name(config.mask_path.as_deref());
        log::debug!("new container sub={sub_name} run={run_name} mask={mask_name}");

        Mvp {
            directory,
            sub_name,
            run_name,
            mask_name,
            config,
            cope_labels: None,
            metadata: None,
            mask: None,
            header: None,
            affine: None,
            x: None,
        }
    }

    // -- identity and configuration --

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn sub_name(&self) -> &str {
        &self.sub_name
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn mask_name(&self) -> &str {
        &self.mask_name
    }

    pub fn config(&self) -> &MvpConfig {
        &self.config
    }

    pub fn ref_space(&self) -> ReferenceSpace {
        self.config.ref_space
    }

    // -- data accessors --

    pub fn cope_labels(&self) -> Option<&[String]> {
        self.cope_labels.as_deref()
    }

    /// Label-derived fields; `None` until [`Mvp::update_metadata`] runs.
    pub fn metadata(&self) -> Option<&LabelMetadata> {
        self.metadata.as_ref()
    }

    pub fn y(&self) -> Option<&[usize]> {
        self.metadata.as_ref().map(|m| m.y.as_slice())
    }

    pub fn mask(&self) -> Option<&VoxelMask> {
        self.mask.as_ref()
    }

    pub fn header(&self) -> Option<&SpatialHeader> {
        self.header.as_ref()
    }

    pub fn affine(&self) -> Option<&Array2<f64>> {
        self.affine.as_ref()
    }

    pub fn x(&self) -> Option<&Array2<f64>> {
        self.x.as_ref()
    }

    // -- setters used by loaders --

    /// Replace the raw condition labels. Stale label metadata is dropped.
    pub fn set_cope_labels(&mut self, labels: Vec<String>) -> Result<()> {
        if let Some(x) = &self.x {
            if x.nrows() != labels.len() {
                return Err(MvpError::SampleMismatch {
                    labels: labels.len(),
                    samples: x.nrows(),
                });
            }
        }
        self.cope_labels = Some(labels);
        self.metadata = None;
        Ok(())
    }

    /// Replace the pattern matrix, checking it against labels and mask.
    pub fn set_x(&mut self, x: Array2<f64>) -> Result<()> {
        if let Some(labels) = &self.cope_labels {
            if labels.len() != x.nrows() {
                return Err(MvpError::SampleMismatch {
                    labels: labels.len(),
                    samples: x.nrows(),
                });
            }
        }
        if let Some(mask) = &self.mask {
            if mask.count_true() != x.ncols() {
                return Err(MvpError::FeatureMismatch {
                    mask: mask.count_true(),
                    features: x.ncols(),
                });
            }
        }
        self.x = Some(x);
        Ok(())
    }

    /// Set the initial mask. The volume shape is fixed from here on.
    pub fn set_mask(&mut self, mask: VoxelMask) -> Result<()> {
        if let Some(current) = &self.mask {
            if current.shape() != mask.shape() {
                return Err(MvpError::InvalidState(format!(
                    "mask shape is fixed at {:?}, got {:?}",
                    current.shape(),
                    mask.shape()
                )));
            }
        }
        if let Some(x) = &self.x {
            if mask.count_true() != x.ncols() {
                return Err(MvpError::FeatureMismatch {
                    mask: mask.count_true(),
                    features: x.ncols(),
                });
            }
        }
        self.mask = Some(mask);
        Ok(())
    }

    pub fn set_spatial(&mut self, header: SpatialHeader, affine: Array2<f64>) {
        self.header = Some(header);
        self.affine = Some(affine);
    }

    // -- core operations --

    /// Recompute every label-derived field from the current condition labels.
    pub fn update_metadata(&mut self) -> Result<()> {
        let labels = match self.cope_labels.as_deref() {
            Some(l) if !l.is_empty() => l,
            Some(_) => {
                return Err(MvpError::InvalidState(
                    "cope_labels is empty".to_string(),
                ))
            }
            None => {
                return Err(MvpError::InvalidState(
                    "cope_labels has not been set".to_string(),
                ))
            }
        };

        let metadata = LabelMetadata::from_labels(labels);
        log::debug!(
            "{}/{}: {} trials in {} conditions {:?}",
            self.sub_name,
            self.run_name,
            metadata.n_trials,
            metadata.n_cope,
            metadata.cope_names
        );
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Narrow the active mask with `sub_index`, one entry per currently
    /// active voxel (non-zero keeps the voxel).
    ///
    /// Leaves `x` alone: until the caller selects the same columns, `x` and
    /// the mask disagree. On error nothing changes.
    pub fn update_mask<T: MaskValue>(&mut self, sub_index: &[T]) -> Result<()> {
        let mask = self
            .mask
            .as_ref()
            .ok_or_else(|| MvpError::InvalidState("mask has not been set".to_string()))?;
        let refined = mask.refined(sub_index)?;
        log::debug!(
            "{}/{}: mask narrowed from {} to {} voxels",
            self.sub_name,
            self.run_name,
            mask.count_true(),
            refined.count_true()
        );
        self.mask = Some(refined);
        Ok(())
    }

    /// Narrow the mask and select the matching columns of `x` in one step.
    pub fn update_mask_and_patterns<T: MaskValue>(&mut self, sub_index: &[T]) -> Result<()> {
        let (mask, x) = match (&self.mask, &self.x) {
            (Some(mask), Some(x)) => (mask, x),
            _ => {
                return Err(MvpError::InvalidState(
                    "mask and patterns must both be set".to_string(),
                ))
            }
        };
        if mask.count_true() != x.ncols() {
            return Err(MvpError::FeatureMismatch {
                mask: mask.count_true(),
                features: x.ncols(),
            });
        }

        let refined = mask.refined(sub_index)?;
        let keep: Vec<usize> = sub_index
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_set())
            .map(|(i, _)| i)
            .collect();
        let narrowed = x.select(Axis(1), &keep);
        log::debug!(
            "{}/{}: patterns narrowed from {} to {} features",
            self.sub_name,
            self.run_name,
            x.ncols(),
            narrowed.ncols()
        );

        self.mask = Some(refined);
        self.x = Some(narrowed);
        Ok(())
    }

    /// Check label/row and mask/column agreement for whatever is set.
    pub fn validate(&self) -> Result<()> {
        if let (Some(labels), Some(x)) = (&self.cope_labels, &self.x) {
            if labels.len() != x.nrows() {
                return Err(MvpError::SampleMismatch {
                    labels: labels.len(),
                    samples: x.nrows(),
                });
            }
        }
        if let (Some(meta), Some(labels)) = (&self.metadata, &self.cope_labels) {
            if meta.y.len() != labels.len() {
                return Err(MvpError::SampleMismatch {
                    labels: meta.y.len(),
                    samples: labels.len(),
                });
            }
        }
        if let (Some(mask), Some(x)) = (&self.mask, &self.x) {
            if mask.count_true() != x.ncols() {
                return Err(MvpError::FeatureMismatch {
                    mask: mask.count_true(),
                    features: x.ncols(),
                });
            }
        }
        Ok(())
    }

    /// Compact description for logs and the CLI.
    pub fn summary(&self) -> MvpSummary {
        MvpSummary {
            directory: self.directory.display().to_string(),
            sub_name: self.sub_name.clone(),
            run_name: self.run_name.clone(),
            mask_name: self.mask_name.clone(),
            ref_space: self.config.ref_space,
            n_trials: self.x.as_ref().map(|x| x.nrows()),
            n_features: self.x.as_ref().map(|x| x.ncols()),
            mask_shape: self.mask.as_ref().map(|m| m.shape().to_vec()),
            cope_names: self.metadata.as_ref().map(|m| m.cope_names.clone()),
            n_inst_per_cope: self.metadata.as_ref().map(|m| {
                m.trial_idx.iter().map(Vec::len).collect()
            }),
        }
    }
}

/// Serializable snapshot of a container's shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MvpSummary {
    pub directory: String,
    pub sub_name: String,
    pub run_name: String,
    pub mask_name: String,
    pub ref_space: ReferenceSpace,
    pub n_trials: Option<usize>,
    pub n_features: Option<usize>,
    pub mask_shape: Option<Vec<usize>>,
    pub cope_names: Option<Vec<String>>,
    pub n_inst_per_cope: Option<Vec<usize>>,
}

impl fmt::Display for MvpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "directory : {}", self.directory)?;
        writeln!(f, "subject   : {}", self.sub_name)?;
        writeln!(f, "run       : {}", self.run_name)?;
        writeln!(f, "mask      : {} ({})", self.mask_name, self.ref_space)?;
        if let (Some(n), Some(k)) = (self.n_trials, self.n_features) {
            writeln!(f, "patterns  : {n} trials x {k} voxels")?;
        }
        if let Some(shape) = &self.mask_shape {
            writeln!(f, "volume    : {shape:?}")?;
        }
        if let (Some(names), Some(counts)) = (&self.cope_names, &self.n_inst_per_cope) {
            for (name, count) in names.iter().zip(counts) {
                writeln!(f, "  {name}: {count}")?;
            }
        }
        Ok(())
    }
}
