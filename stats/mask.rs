//! Conversion between volumetric data and the flattened voxel matrix.
//!
//! A [`Volume`] is a 4-D array indexed `(x, y, z, observation)`; a single 3-D
//! image is a volume with one observation. A [`MaskingAdapter`] decides which
//! spatial positions become voxel columns and in which order.

use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

pub type Volume = Array4<f64>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskError {
    #[error("Volume spatial shape {found:?} does not match mask shape {expected:?}.")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("Data has {found} voxel columns but the mask selects {expected} voxels.")]
    VoxelCount { expected: usize, found: usize },
    #[error("The mask does not select any voxel.")]
    EmptyMask,
    #[error("A default mask has already been registered for this process.")]
    DefaultAlreadySet,
    #[error("No mask was supplied and no default mask has been registered.")]
    NoDefaultMask,
}

/// Boundary to volumetric space. Implementations must be deterministic: the
/// same volume always flattens to the same column order.
pub trait MaskingAdapter: fmt::Debug + Send + Sync {
    /// Number of voxel columns produced by [`flatten`](Self::flatten).
    fn voxel_count(&self) -> usize;

    /// Flattens `volume` into an `[observations, voxel_count]` matrix.
    fn flatten(&self, volume: &Volume) -> Result<Array2<f64>, MaskError>;

    /// Scatters `[observations, voxel_count]` data back into a volume.
    fn inverse(&self, data: ArrayView2<f64>) -> Result<Volume, MaskError>;
}

/// A boolean brain mask. In-mask positions are enumerated in C order
/// (`x` slowest, `z` fastest).
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryMask {
    mask: Array3<bool>,
    positions: Vec<(usize, usize, usize)>,
}

impl BinaryMask {
    pub fn new(mask: Array3<bool>) -> Result<Self, MaskError> {
        let positions: Vec<(usize, usize, usize)> = mask
            .indexed_iter()
            .filter_map(|(idx, &inside)| inside.then_some(idx))
            .collect();
        if positions.is_empty() {
            return Err(MaskError::EmptyMask);
        }
        Ok(Self { mask, positions })
    }

    /// Builds a mask from an intensity image, keeping voxels strictly above `threshold`.
    pub fn from_threshold(image: &Array3<f64>, threshold: f64) -> Result<Self, MaskError> {
        Self::new(image.mapv(|v| v > threshold))
    }

    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        self.mask.dim()
    }

    pub fn contains(&self, position: (usize, usize, usize)) -> bool {
        self.mask.get(position).copied().unwrap_or(false)
    }
}

impl MaskingAdapter for BinaryMask {
    fn voxel_count(&self) -> usize {
        self.positions.len()
    }

    fn flatten(&self, volume: &Volume) -> Result<Array2<f64>, MaskError> {
        let (x, y, z, n_obs) = volume.dim();
        if (x, y, z) != self.spatial_shape() {
            return Err(MaskError::ShapeMismatch {
                expected: self.spatial_shape(),
                found: (x, y, z),
            });
        }
        let mut data = Array2::zeros((n_obs, self.voxel_count()));
        for (obs, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
            let image = volume.index_axis(Axis(3), obs);
            for (col, &position) in self.positions.iter().enumerate() {
                row[col] = image[position];
            }
        }
        Ok(data)
    }

    fn inverse(&self, data: ArrayView2<f64>) -> Result<Volume, MaskError> {
        if data.ncols() != self.voxel_count() {
            return Err(MaskError::VoxelCount {
                expected: self.voxel_count(),
                found: data.ncols(),
            });
        }
        let (x, y, z) = self.spatial_shape();
        let mut volume = Volume::zeros((x, y, z, data.nrows()));
        for (obs, row) in data.axis_iter(Axis(0)).enumerate() {
            let mut image = volume.index_axis_mut(Axis(3), obs);
            for (&position, &value) in self.positions.iter().zip(row.iter()) {
                image[position] = value;
            }
        }
        Ok(volume)
    }
}

static DEFAULT_MASK: OnceLock<Arc<BinaryMask>> = OnceLock::new();

/// Registers the process-wide default mask. It can be set once and is
/// read-only afterwards.
pub fn set_default_mask(mask: BinaryMask) -> Result<Arc<BinaryMask>, MaskError> {
    let shared = Arc::new(mask);
    DEFAULT_MASK
        .set(Arc::clone(&shared))
        .map_err(|_| MaskError::DefaultAlreadySet)?;
    Ok(shared)
}

pub fn default_mask() -> Result<Arc<BinaryMask>, MaskError> {
    DEFAULT_MASK.get().cloned().ok_or(MaskError::NoDefaultMask)
}
