//! # The voxel matrix container
//!
//! `VoxelMatrix` owns an `[observations, voxels]` payload plus optional labels
//! and design, and a shared handle to the masking metadata that maps its columns
//! back into volumetric space.
//!
//! - Copy-on-derive: every derived instance (`mean`, `std`, engine outputs,
//!   weight maps) gets its own payload buffer. Only the immutable mask handle
//!   is shared.
//! - The voxel count is fixed by the mask and never changes for an instance.
//! - Labels and design, when present, always have one entry per observation.
//!   A derivation that changes the row count drops them.

use crate::design::Design;
use crate::error::{Error, Result};
use crate::mask::{self, MaskingAdapter, Volume};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct VoxelMatrix {
    data: Array2<f64>,
    labels: Array1<f64>,
    design: Design,
    mask: Arc<dyn MaskingAdapter>,
    file_name: Option<String>,
}

impl VoxelMatrix {
    /// Wraps an already flattened `[observations, voxels]` matrix.
    pub fn new(data: Array2<f64>, mask: Arc<dyn MaskingAdapter>) -> Result<Self> {
        if data.ncols() != mask.voxel_count() {
            return Err(Error::shape(
                "voxel matrix construction",
                mask.voxel_count(),
                data.ncols(),
            ));
        }
        Ok(Self {
            data,
            labels: Array1::zeros(0),
            design: Design::empty(),
            mask,
            file_name: None,
        })
    }

    /// Flattens a volume through `mask`.
    pub fn from_volume(volume: &Volume, mask: Arc<dyn MaskingAdapter>) -> Result<Self> {
        let data = mask.flatten(volume)?;
        Self::new(data, mask)
    }

    /// Like [`new`](Self::new) but uses the process-wide default mask.
    pub fn with_default_mask(data: Array2<f64>) -> Result<Self> {
        let mask: Arc<dyn MaskingAdapter> = mask::default_mask()?;
        Self::new(data, mask)
    }

    pub fn with_labels(mut self, labels: Array1<f64>) -> Result<Self> {
        if labels.len() != self.rows() {
            return Err(Error::InvalidInput(format!(
                "labels have {} entries but the data has {} observations",
                labels.len(),
                self.rows()
            )));
        }
        self.labels = labels;
        Ok(self)
    }

    pub fn with_design(mut self, design: Design) -> Result<Self> {
        if design.nrows() != self.rows() {
            return Err(Error::InvalidInput(format!(
                "design has {} rows but the data has {} observations",
                design.nrows(),
                self.rows()
            )));
        }
        self.design = design;
        Ok(self)
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// A new instance sharing this one's metadata but owning `data`.
    ///
    /// Labels and design survive only if the row count is unchanged.
    pub fn derive(&self, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != self.voxel_count() {
            return Err(Error::shape("derived voxel matrix", self.voxel_count(), data.ncols()));
        }
        let keep_rows = data.nrows() == self.rows();
        Ok(Self {
            labels: if keep_rows && self.has_labels() {
                self.labels.clone()
            } else {
                Array1::zeros(0)
            },
            design: if keep_rows && self.has_design() {
                self.design.clone()
            } else {
                Design::empty()
            },
            data,
            mask: Arc::clone(&self.mask),
            file_name: self.file_name.clone(),
        })
    }

    /// A single-observation instance holding `values`.
    pub fn derive_row(&self, values: Array1<f64>) -> Result<Self> {
        let len = values.len();
        let data = values
            .into_shape_with_order((1, len))
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        self.derive(data)
    }

    /// Like [`derive`](Self::derive) but never carries labels or design. For
    /// outputs whose rows are not observations, such as per-fold weight maps.
    pub fn derive_detached(&self, data: Array2<f64>) -> Result<Self> {
        let mut derived = self.derive(data)?;
        derived.labels = Array1::zeros(0);
        derived.design = Design::empty();
        Ok(derived)
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn into_data(self) -> Array2<f64> {
        self.data
    }

    pub fn labels(&self) -> ArrayView1<'_, f64> {
        self.labels.view()
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn has_design(&self) -> bool {
        !self.design.is_empty()
    }

    pub fn mask(&self) -> &Arc<dyn MaskingAdapter> {
        &self.mask
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// `(observations, voxels)`.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn voxel_count(&self) -> usize {
        self.data.ncols()
    }

    /// The observation at `index`, with its label and design row.
    pub fn row(&self, index: usize) -> Result<Self> {
        if index >= self.rows() {
            return Err(Error::InvalidInput(format!(
                "observation {index} is out of range for {} observations",
                self.rows()
            )));
        }
        self.select_rows(&[index])
    }

    /// Observations in `range`, with matching labels and design rows.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.rows() {
            return Err(Error::InvalidInput(format!(
                "slice {range:?} is out of range for {} observations",
                self.rows()
            )));
        }
        let rows: Vec<usize> = range.collect();
        self.select_rows(&rows)
    }

    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.rows()) {
            return Err(Error::InvalidInput(format!(
                "observation {bad} is out of range for {} observations",
                self.rows()
            )));
        }
        Ok(Self {
            data: self.data.select(Axis(0), rows),
            labels: if self.has_labels() {
                self.labels.select(Axis(0), rows)
            } else {
                Array1::zeros(0)
            },
            design: if self.has_design() {
                self.design.select_rows(rows)
            } else {
                Design::empty()
            },
            mask: Arc::clone(&self.mask),
            file_name: self.file_name.clone(),
        })
    }

    /// Per-voxel mean across observations.
    pub fn mean(&self) -> Result<Self> {
        let mean = self.data.mean_axis(Axis(0)).ok_or_else(|| {
            Error::InvalidInput("cannot average a matrix with no observations".to_string())
        })?;
        self.derive_row(mean)
    }

    /// Per-voxel population standard deviation across observations.
    pub fn std(&self) -> Result<Self> {
        if self.rows() == 0 {
            return Err(Error::InvalidInput(
                "cannot take the deviation of a matrix with no observations".to_string(),
            ));
        }
        self.derive_row(self.data.std_axis(Axis(0), 0.0))
    }

    /// Stacks the observations of `other` below this instance's.
    ///
    /// Labels and design are concatenated when both sides carry them and
    /// dropped otherwise.
    pub fn append(&self, other: &VoxelMatrix) -> Result<Self> {
        if other.voxel_count() != self.voxel_count() {
            return Err(Error::shape("append", self.voxel_count(), other.voxel_count()));
        }
        if self.is_empty() {
            let mut out = other.clone();
            out.mask = Arc::clone(&self.mask);
            out.file_name = self.file_name.clone();
            return Ok(out);
        }

        let data = concatenate(Axis(0), &[self.data.view(), other.data.view()])
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let labels = match (self.has_labels(), other.has_labels()) {
            (true, true) => concatenate(Axis(0), &[self.labels.view(), other.labels.view()])
                .map_err(|e| Error::InvalidInput(e.to_string()))?,
            (false, false) => Array1::zeros(0),
            _ => {
                log::warn!("Only one side of append carries labels; labels are dropped.");
                Array1::zeros(0)
            }
        };

        let design = match (self.has_design(), other.has_design()) {
            (true, true) => self.design.vstack(&other.design)?,
            (false, false) => Design::empty(),
            _ => {
                log::warn!("Only one side of append carries a design; the design is dropped.");
                Design::empty()
            }
        };

        Ok(Self {
            data,
            labels,
            design,
            mask: Arc::clone(&self.mask),
            file_name: self.file_name.clone(),
        })
    }

    /// Same voxel layout and mask, no observations, no labels, no design.
    pub fn empty(&self) -> Self {
        Self {
            data: Array2::zeros((0, self.voxel_count())),
            labels: Array1::zeros(0),
            design: Design::empty(),
            mask: Arc::clone(&self.mask),
            file_name: self.file_name.clone(),
        }
    }

    /// No observations. A matrix over zero voxels can still hold rows.
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Scatters the payload back into volumetric space.
    pub fn to_volume(&self) -> Result<Volume> {
        Ok(self.mask.inverse(self.data.view())?)
    }

    /// Resampling into another space has no algorithm behind it.
    pub fn resample(&self, target: &VoxelMatrix) -> Result<Self> {
        log::debug!(
            "Resample requested from {} to {} voxels",
            self.voxel_count(),
            target.voxel_count()
        );
        Err(Error::NotImplemented("spatial resample"))
    }
}

impl fmt::Display for VoxelMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VoxelMatrix(data={:?}, labels={}, design=({}, {}), file_name={})",
            self.shape(),
            self.labels.len(),
            self.design.nrows(),
            self.design.ncols(),
            self.file_name.as_deref().unwrap_or("-")
        )
    }
}
