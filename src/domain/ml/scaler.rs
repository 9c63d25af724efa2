use crate::domain::errors::{ForecastError, ForecastResult};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Column-wise scaling fitted on a 2-D surface (rows x columns).
pub trait Scaler {
    fn fit(&mut self, data: ArrayView2<f32>) -> ForecastResult<()>;
    fn transform(&self, data: ArrayView2<f32>) -> ForecastResult<Array2<f32>>;
    fn inverse_transform(&self, data: ArrayView2<f32>) -> ForecastResult<Array2<f32>>;
}

/// Maps each column's observed `[min, max]` onto `[0, 1]`.
///
/// Columns with zero range get a unit range, so a constant column transforms
/// to zero instead of dividing by zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    data_min: Option<Array1<f32>>,
    data_range: Option<Array1<f32>>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_min(&self) -> Option<&Array1<f32>> {
        self.data_min.as_ref()
    }

    pub fn data_range(&self) -> Option<&Array1<f32>> {
        self.data_range.as_ref()
    }

    fn params(&self, data: &ArrayView2<f32>) -> ForecastResult<(&Array1<f32>, &Array1<f32>)> {
        let (Some(min), Some(range)) = (&self.data_min, &self.data_range) else {
            return Err(ForecastError::scoring("scaler used before fit"));
        };
        if data.ncols() != min.len() {
            return Err(ForecastError::scoring(format!(
                "scaler fitted on {} columns, got {}",
                min.len(),
                data.ncols()
            )));
        }
        Ok((min, range))
    }
}

impl Scaler for MinMaxScaler {
    fn fit(&mut self, data: ArrayView2<f32>) -> ForecastResult<()> {
        if data.nrows() == 0 {
            return Err(ForecastError::InvalidParameter {
                name: "scaler",
                reason: "cannot fit on an empty matrix".to_string(),
            });
        }
        let min = data.fold_axis(Axis(0), f32::INFINITY, |acc, &v| acc.min(v));
        let max = data.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let range = (&max - &min).mapv(|r| if r == 0.0 || !r.is_finite() { 1.0 } else { r });

        self.data_min = Some(min);
        self.data_range = Some(range);
        Ok(())
    }

    fn transform(&self, data: ArrayView2<f32>) -> ForecastResult<Array2<f32>> {
        let (min, range) = self.params(&data)?;
        Ok((&data - min) / range)
    }

    fn inverse_transform(&self, data: ArrayView2<f32>) -> ForecastResult<Array2<f32>> {
        let (min, range) = self.params(&data)?;
        Ok(&data * range + min)
    }
}
