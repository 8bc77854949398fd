use crate::matrix::VoxelMatrix;
use ndarray::{ArrayView1, ArrayView2};
use std::fmt;

/// Which diagnostic a plotter is asked to draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlotKind {
    WeightMap,
    Scatter,
    Probabilities,
    DecisionDistances,
}

impl PlotKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::WeightMap => "weight map",
            Self::Scatter => "observed versus predicted scatter",
            Self::Probabilities => "class probability plot",
            Self::DecisionDistances => "decision distance plot",
        }
    }
}

impl fmt::Display for PlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer that receives the diagnostics of a prediction run after every
/// returned value has been computed. Implementations only read what they are
/// given.
pub trait PredictionPlotter {
    fn weight_map(&mut self, weights: &VoxelMatrix) {
        let _ = weights;
    }
    fn scatter(&mut self, observed: ArrayView1<f64>, predicted: ArrayView1<f64>) {
        let _ = (observed, predicted);
    }
    fn probabilities(&mut self, observed: ArrayView1<f64>, probabilities: ArrayView2<f64>) {
        let _ = (observed, probabilities);
    }
    fn decision_distances(&mut self, observed: ArrayView1<f64>, distances: ArrayView1<f64>) {
        let _ = (observed, distances);
    }
}

#[derive(Default)]
pub struct NoopPlotter;

impl PredictionPlotter for NoopPlotter {}
