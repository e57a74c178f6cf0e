use ndarray::{Array1, ArrayD, IxDyn};

use crate::error::{MvpError, Result};

// ---------------------------------------------------------------------------
// MaskValue – anything that can be read as keep / drop
// ---------------------------------------------------------------------------

/// A value read as a boolean selector: non-zero means keep.
pub trait MaskValue: Copy {
    fn is_set(self) -> bool;
}

impl MaskValue for bool {
    fn is_set(self) -> bool {
        self
    }
}

macro_rules! impl_mask_value_int {
    ($($t:ty),*) => {
        $(impl MaskValue for $t {
            fn is_set(self) -> bool {
                self != 0
            }
        })*
    };
}

impl_mask_value_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl MaskValue for f32 {
    fn is_set(self) -> bool {
        self != 0.0
    }
}

impl MaskValue for f64 {
    fn is_set(self) -> bool {
        self != 0.0
    }
}

// ---------------------------------------------------------------------------
// VoxelMask – flattened active-voxel index plus its volume shape
// ---------------------------------------------------------------------------

/// Active voxel selection over a spatial volume.
///
/// `index` is stored flattened in row-major order over `shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelMask {
    index: Array1<bool>,
    shape: Vec<usize>,
}

impl VoxelMask {
    /// Wrap a flattened index, checking it fills `shape` exactly.
    pub fn new(index: Array1<bool>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if index.len() != expected {
            return Err(MvpError::MaskShape {
                len: index.len(),
                shape,
                expected,
            });
        }
        Ok(VoxelMask { index, shape })
    }

    /// Every voxel of a volume shaped `shape` active.
    pub fn whole_brain(shape: Vec<usize>) -> Self {
        let n: usize = shape.iter().product();
        VoxelMask {
            index: Array1::from_elem(n, true),
            shape,
        }
    }

    /// Binarize a (possibly probabilistic) volume: voxels above `threshold`
    /// are active.
    pub fn from_volume(volume: &ArrayD<f64>, threshold: f64) -> Self {
        VoxelMask {
            index: volume.iter().map(|&v| v > threshold).collect(),
            shape: volume.shape().to_vec(),
        }
    }

    pub fn index(&self) -> &Array1<bool> {
        &self.index
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of active voxels.
    pub fn count_true(&self) -> usize {
        self.index.iter().filter(|&&b| b).count()
    }

    /// Flat positions of the active voxels, ascending.
    pub fn active_positions(&self) -> Vec<usize> {
        self.index
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b)
            .map(|(i, _)| i)
            .collect()
    }

    /// The index reshaped to the volume.
    pub fn to_volume(&self) -> Result<ArrayD<bool>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.index.to_vec()).map_err(|_| {
            MvpError::MaskShape {
                len: self.index.len(),
                shape: self.shape.clone(),
                expected: self.shape.iter().product(),
            }
        })
    }

    /// Compose this mask with `sub_index`, which holds one entry per
    /// currently active voxel. Returns the narrowed mask; `self` is untouched.
    pub fn refined<T: MaskValue>(&self, sub_index: &[T]) -> Result<VoxelMask> {
        let current = self.count_true();
        if sub_index.len() != current {
            return Err(MvpError::DimensionMismatch {
                new: sub_index.len(),
                current,
            });
        }

        let mut scratch = ArrayD::<f64>::zeros(IxDyn(&self.shape));
        let mut values = sub_index.iter();
        for (cell, &active) in scratch.iter_mut().zip(self.to_volume()?.iter()) {
            if active {
                if let Some(v) = values.next() {
                    *cell += if v.is_set() { 1.0 } else { 0.0 };
                }
            }
        }

        Ok(VoxelMask {
            index: scratch.iter().map(|&v| v != 0.0).collect(),
            shape: self.shape.clone(),
        })
    }

    /// Whether every active voxel of `self` is also active in `other`.
    pub fn is_subset_of(&self, other: &VoxelMask) -> bool {
        self.shape == other.shape
            && self
                .index
                .iter()
                .zip(other.index.iter())
                .all(|(&a, &b)| !a || b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mask_2x2() -> VoxelMask {
        VoxelMask::new(array![true, false, true, false], vec![2, 2]).unwrap()
    }

    #[test]
    fn new_rejects_wrong_length() {
        let err = VoxelMask::new(array![true, false, true], vec![2, 2]).unwrap_err();
        assert_eq!(
            err,
            MvpError::MaskShape {
                len: 3,
                shape: vec![2, 2],
                expected: 4
            }
        );
    }

    #[test]
    fn refined_places_values_in_row_major_order() {
        let refined = mask_2x2().refined(&[1, 0]).unwrap();
        assert_eq!(refined.index(), &array![true, false, false, false]);
        assert_eq!(refined.shape(), &[2, 2]);

        let refined = mask_2x2().refined(&[false, true]).unwrap();
        assert_eq!(refined.index(), &array![false, false, true, false]);
    }

    #[test]
    fn refined_treats_any_nonzero_as_keep() {
        let refined = mask_2x2().refined(&[-0.5f64, 3.0]).unwrap();
        assert_eq!(refined.count_true(), 2);
    }

    #[test]
    fn refined_rejects_wrong_length() {
        let err = mask_2x2().refined(&[1, 0, 1]).unwrap_err();
        assert_eq!(err, MvpError::DimensionMismatch { new: 3, current: 2 });
        let msg = err.to_string();
        assert!(msg.contains('3') && msg.contains('2'));
    }

    #[test]
    fn refined_in_3d_volume() {
        let mut flat = vec![0.0; 12];
        flat[1] = 0.9; // (0, 0, 1)
        flat[4] = 0.4; // (0, 2, 0)
        flat[9] = 0.7; // (1, 1, 1)
        let volume = ArrayD::from_shape_vec(IxDyn(&[2, 3, 2]), flat).unwrap();
        let mask = VoxelMask::from_volume(&volume, 0.0);
        assert_eq!(mask.active_positions(), vec![1, 4, 9]);

        let refined = mask.refined(&[true, false, true]).unwrap();
        assert_eq!(refined.active_positions(), vec![1, 9]);
        assert!(refined.is_subset_of(&mask));
        assert!(!mask.is_subset_of(&refined));
    }

    #[test]
    fn from_volume_threshold_is_exclusive_lower_bound() {
        let volume = ArrayD::from_shape_vec(IxDyn(&[4]), vec![0.0, 0.2, 0.5, 0.8]).unwrap();
        let mask = VoxelMask::from_volume(&volume, 0.5);
        assert_eq!(mask.index(), &array![false, false, false, true]);
    }

    #[test]
    fn whole_brain_is_all_active() {
        let mask = VoxelMask::whole_brain(vec![3, 2]);
        assert_eq!(mask.count_true(), 6);
        assert_eq!(mask.to_volume().unwrap().shape(), &[3, 2]);
    }
}
