use crate::domain::errors::{ForecastError, ForecastResult};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Ordered regression target names produced by feature providers.
/// Bundles persist this list; predictors look columns up by name.
pub const TARGET_REG_COLS: &[&str] =
    &["open_next", "high_next", "low_next", "close_next", "amp_next"];

/// Target column used for holdout evaluation and futures reconciliation.
pub const CLOSE_TARGET: &str = "close_next";
pub const AMP_TARGET: &str = "amp_next";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn amplitude(&self) -> f64 {
        self.high - self.low
    }
}

/// Matrix with named, ordered columns. One row per timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub values: Array2<f32>,
}

impl Frame {
    pub fn new(columns: Vec<String>, values: Array2<f32>) -> ForecastResult<Self> {
        if columns.len() != values.ncols() {
            return Err(ForecastError::InvalidParameter {
                name: "columns",
                reason: format!(
                    "{} column names for a matrix with {} columns",
                    columns.len(),
                    values.ncols()
                ),
            });
        }
        Ok(Self { columns, values })
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn column_index(&self, name: &str) -> ForecastResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ForecastError::UnknownColumn {
                name: name.to_string(),
            })
    }

    /// Returns a frame holding exactly `names`, in that order.
    pub fn select(&self, names: &[String]) -> ForecastResult<Frame> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<ForecastResult<Vec<_>>>()?;
        Ok(Frame {
            columns: names.to_vec(),
            values: self.values.select(Axis(1), &indices),
        })
    }
}

/// Output of a feature/target provider.
///
/// `rows[i]` is the candle the features of row `i` were computed from; the
/// targets and direction of row `i` describe `rows[i + 1]`. The provider owns
/// that shift, nothing downstream re-applies it.
#[derive(Debug, Clone)]
pub struct FeatureTargetFrame {
    pub rows: Vec<Candle>,
    pub features: Frame,
    pub targets: Frame,
    pub direction: Array1<u8>,
}

impl FeatureTargetFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn frame() -> Frame {
        Frame::new(
            vec!["a".into(), "b".into(), "c".into()],
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_select_reorders_columns() {
        let selected = frame().select(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(selected.columns, vec!["c", "a"]);
        assert_eq!(selected.values, array![[3.0, 1.0], [6.0, 4.0]]);
    }

    #[test]
    fn test_select_unknown_column() {
        let err = frame().select(&["z".to_string()]).unwrap_err();
        assert_eq!(err, ForecastError::UnknownColumn { name: "z".into() });
    }

    #[test]
    fn test_new_rejects_width_mismatch() {
        assert!(Frame::new(vec!["a".into()], array![[1.0, 2.0]]).is_err());
    }
}
