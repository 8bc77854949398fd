use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use polars::prelude::*;

/// A design matrix with named columns, one row per observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Design {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl Design {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(Error::InvalidDesign(format!(
                "{} column names supplied for {} design columns",
                columns.len(),
                values.ncols()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidDesign(
                "design contains NaN or infinite values".to_string(),
            ));
        }
        Ok(Self { columns, values })
    }

    /// A design with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    /// A single `intercept` column of ones.
    pub fn intercept(n_obs: usize) -> Self {
        Self {
            columns: vec!["intercept".to_string()],
            values: Array2::ones((n_obs, 1)),
        }
    }

    /// Reads every column of `df` as a float predictor.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let mut columns = Vec::with_capacity(df.width());
        for column in df.get_columns() {
            if column.null_count() > 0 {
                return Err(Error::InvalidDesign(format!(
                    "missing values in design column '{}'",
                    column.name()
                )));
            }
            if !column.dtype().is_primitive_numeric() && !column.dtype().is_bool() {
                return Err(Error::InvalidDesign(format!(
                    "design column '{}' is not numeric (found {:?})",
                    column.name(),
                    column.dtype()
                )));
            }
            columns.push(column.name().to_string());
        }
        let values = df.to_ndarray::<Float64Type>(IndexOrder::C)?;
        Self::new(columns, values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// Stacks `other` below `self`. Column names must agree.
    pub fn vstack(&self, other: &Design) -> Result<Self> {
        if self.columns != other.columns {
            return Err(Error::InvalidDesign(format!(
                "cannot stack designs with columns {:?} and {:?}",
                self.columns, other.columns
            )));
        }
        let values = concatenate(Axis(0), &[self.values.view(), other.values.view()])
            .map_err(|e| Error::InvalidDesign(e.to_string()))?;
        Ok(Self {
            columns: self.columns.clone(),
            values,
        })
    }
}
