//! Sliding-window dataset construction for sequence models.
//!
//! A window of length `L` ending at row `t` covers rows `t-L+1..=t` and
//! carries the targets of row `t`. Since providers already shift targets by
//! one step, the window at `t` is supervised by what happened at `t+1`.

use crate::domain::errors::{ForecastError, ForecastResult};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};

pub const DEFAULT_HOLDOUT_MAX: usize = 500;
pub const DEFAULT_TRAIN_RATIO: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDataset {
    /// (n_seq, seq_len, n_features)
    pub x_seq: Array3<f32>,
    /// (n_seq, n_reg_targets)
    pub y_reg: Array2<f32>,
    /// (n_seq,) 0/1
    pub y_cls: Array1<u8>,
    /// Row of the source frame each window ends at.
    pub index_original: Vec<usize>,
}

impl SequenceDataset {
    pub fn len(&self) -> usize {
        self.index_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_original.is_empty()
    }
}

fn check_window(rows: usize, seq_len: usize) -> ForecastResult<()> {
    if rows <= seq_len {
        return Err(ForecastError::InsufficientData { rows, seq_len });
    }
    Ok(())
}

fn check_seq_len(seq_len: usize) -> ForecastResult<()> {
    if seq_len < 2 {
        return Err(ForecastError::InvalidWindowLength { seq_len });
    }
    Ok(())
}

fn window_features(features: ArrayView2<f32>, seq_len: usize) -> (Array3<f32>, Vec<usize>) {
    let n = features.nrows();
    let n_seq = n - (seq_len - 1);
    let mut x_seq = Array3::<f32>::zeros((n_seq, seq_len, features.ncols()));
    let mut index_original = Vec::with_capacity(n_seq);

    for (j, t) in (seq_len - 1..n).enumerate() {
        x_seq
            .index_axis_mut(Axis(0), j)
            .assign(&features.slice(s![t + 1 - seq_len..=t, ..]));
        index_original.push(t);
    }

    (x_seq, index_original)
}

/// Inference-only windows: no targets required.
///
/// Returns the windows and, for each, the index of its terminal row.
pub fn build_inference_sequences(
    features: ArrayView2<f32>,
    seq_len: usize,
) -> ForecastResult<(Array3<f32>, Vec<usize>)> {
    check_seq_len(seq_len)?;
    check_window(features.nrows(), seq_len)?;
    Ok(window_features(features, seq_len))
}

/// Training windows carrying the regression and classification targets of
/// each window's terminal row.
pub fn build_sequences(
    features: ArrayView2<f32>,
    y_reg: ArrayView2<f32>,
    y_cls: ArrayView1<u8>,
    seq_len: usize,
) -> ForecastResult<SequenceDataset> {
    check_seq_len(seq_len)?;
    let n = features.nrows();
    if y_reg.nrows() != n {
        return Err(ForecastError::LengthMismatch {
            features: n,
            targets: y_reg.nrows(),
            what: "regression target",
        });
    }
    if y_cls.len() != n {
        return Err(ForecastError::LengthMismatch {
            features: n,
            targets: y_cls.len(),
            what: "classification target",
        });
    }
    check_window(n, seq_len)?;

    let (x_seq, index_original) = window_features(features, seq_len);
    let y_reg_out = y_reg.select(Axis(0), &index_original);
    let y_cls_out = y_cls.select(Axis(0), &index_original);

    Ok(SequenceDataset {
        x_seq,
        y_reg: y_reg_out,
        y_cls: y_cls_out,
        index_original,
    })
}

/// Start index of the validation partition for a time-ordered split.
///
/// Validation always follows training in time. Its size is bounded by
/// `holdout_max` so long histories keep most of their data for training.
pub fn temporal_split_index(n: usize, holdout_max: usize, train_ratio: f64) -> usize {
    if n <= 1 {
        return 0;
    }
    let by_ratio = (n as f64 * train_ratio).round() as usize;
    let by_cap = n.saturating_sub(holdout_max);
    by_ratio.max(by_cap).clamp(1, n - 1)
}
