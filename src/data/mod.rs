/// Data layer: the pattern container, its label and mask logic, and loading.
///
/// Architecture:
/// ```text
///  patterns (.parquet / .json / .csv)      mask (.json)
///        │                                    │
///        ▼                                    ▼
///   ┌──────────┐                        ┌───────────┐
///   │  loader   │  parse → PatternTable │ load_mask  │  threshold → VoxelMask
///   └──────────┘                        └───────────┘
///        │                                    │
///        ▼                                    │
///   ┌──────────┐                              │
///   │  filter   │  drop remove_cope trials     │
///   └──────────┘                              │
///        │  tstat: beta / sqrt(var)           │
///        ▼                                    ▼
///   ┌──────────────────────────────────────────────┐
///   │ Mvp   x, cope_labels, mask, header, affine    │
///   │   update_metadata()  labels → LabelMetadata   │
///   │   update_mask(idx)   mask ∘ idx → narrower    │
///   └──────────────────────────────────────────────┘
/// ```

pub mod filter;
pub mod labels;
pub mod loader;
pub mod mask;
pub mod model;
pub mod tstat;
