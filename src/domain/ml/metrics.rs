use ndarray::Array1;
use serde::{Deserialize, Serialize};

const DENOMINATOR_EPS: f64 = 1e-9;

/// Recency weights for `n` samples ordered oldest to newest: `alpha^(n-1-j)`.
///
/// The newest sample weighs exactly 1.0.
pub fn exp_sample_weights(n: usize, alpha: f64) -> Array1<f32> {
    Array1::from_shape_fn(n, |j| alpha.powi((n - 1 - j) as i32) as f32)
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()))
}

pub fn root_mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2))).sqrt()
}

/// MAPE in percent. Zero true values are replaced by a tiny epsilon.
pub fn mean_absolute_percentage_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| {
        let den = if *t == 0.0 { DENOMINATOR_EPS } else { *t };
        ((t - p) / den).abs()
    })) * 100.0
}

/// Symmetric MAPE in percent: `2|p - t| / (|t| + |p|)`.
pub fn symmetric_mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| {
        let den = t.abs() + p.abs();
        let den = if den == 0.0 { DENOMINATOR_EPS } else { den };
        2.0 * (p - t).abs() / den
    })) * 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Error of the designated target column on the holdout partition, in price units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldoutMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub smape: f64,
}

impl HoldoutMetrics {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            mae: mean_absolute_error(y_true, y_pred),
            rmse: root_mean_squared_error(y_true, y_pred),
            mape: mean_absolute_percentage_error(y_true, y_pred),
            smape: symmetric_mape(y_true, y_pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_decay_backwards_from_newest() {
        for alpha in [0.5, 0.9, 0.999] {
            let w = exp_sample_weights(50, alpha);
            assert_eq!(w[49], 1.0);
            for j in 1..50 {
                assert!(w[j - 1] < w[j], "alpha={} j={}", alpha, j);
            }
        }
    }

    #[test]
    fn test_weights_alpha_one_is_uniform() {
        let w = exp_sample_weights(5, 1.0);
        assert!(w.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_weights_exact_values() {
        let w = exp_sample_weights(3, 0.5);
        assert_eq!(w.to_vec(), vec![0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_holdout_metrics() {
        let y_true = [100.0, 200.0];
        let y_pred = [110.0, 190.0];
        let m = HoldoutMetrics::compute(&y_true, &y_pred);

        assert!((m.mae - 10.0).abs() < 1e-12);
        assert!((m.rmse - 10.0).abs() < 1e-12);
        assert!((m.mape - 7.5).abs() < 1e-9);
        let expected_smape = (20.0 / 210.0 + 20.0 / 390.0) / 2.0 * 100.0;
        assert!((m.smape - expected_smape).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominators_are_guarded() {
        let mape = mean_absolute_percentage_error(&[0.0], &[0.0]);
        assert_eq!(mape, 0.0);
        let smape = symmetric_mape(&[0.0], &[0.0]);
        assert_eq!(smape, 0.0);
        assert!(mean_absolute_percentage_error(&[0.0], &[1.0]).is_finite());
    }
}
