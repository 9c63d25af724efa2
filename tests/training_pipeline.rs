mod common;

use anyhow::Result;
use async_trait::async_trait;
use candlecast::application::forecasting::SeriesPredictor;
use candlecast::domain::forecasting::{DegradedReason, JobStatus, SeriesOutcome, TRAIN_JOB};
use candlecast::domain::ml::BundleManifest;
use candlecast::domain::ports::{FeatureTargetProvider, HistorySource};
use candlecast::domain::types::{CLOSE_TARGET, Candle};
use candlecast::infrastructure::TechnicalFeatureProvider;
use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayView2, Axis, s};
use common::{SEQ_LEN, WARMUP_ROWS, in_memory_system, recent_candles, trained_system};
use std::sync::Arc;

const N_CANDLES: usize = 200;

struct FailingHistory;

#[async_trait]
impl HistorySource for FailingHistory {
    async fn fetch_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<Candle>> {
        anyhow::bail!("history offline")
    }

    async fn fetch_since(&self, _start: DateTime<Utc>) -> Result<Vec<Candle>> {
        anyhow::bail!("history offline")
    }
}

#[tokio::test]
async fn test_training_publishes_bundle_and_logs_success() {
    let system = in_memory_system(recent_candles(N_CANDLES));
    let outcome = system.train(None, None).await;

    assert!(outcome.is_ok(), "{}", outcome.message);
    let frame_rows = N_CANDLES - WARMUP_ROWS - 1;
    let windows = frame_rows - (SEQ_LEN - 1);
    assert_eq!(outcome.samples, Some(windows));
    // round(0.8 * 162) = 130
    assert_eq!(outcome.split_index, Some(130));
    let epochs = outcome.epochs_ran.unwrap();
    assert!((1..=3).contains(&epochs));
    let metrics = outcome.metrics.unwrap();
    assert!(metrics.mae.is_finite() && metrics.mae >= 0.0);
    assert!(metrics.rmse >= metrics.mae - 1e-9);
    assert!(metrics.mape.is_finite());

    let store = &system.persistence.bundle_store;
    let manifest_bytes = store.get("bundle.json").await.unwrap().expect("manifest written");
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes).unwrap();
    assert_eq!(manifest.seq_len, SEQ_LEN);
    assert!(manifest.model_key.starts_with("scorer-"));
    assert!(manifest.target_reg_cols.iter().any(|c| c == CLOSE_TARGET));
    assert!(store.get(&manifest.model_key).await.unwrap().is_some());

    let last = system
        .persistence
        .job_log_repository
        .latest(TRAIN_JOB)
        .await
        .unwrap()
        .expect("job log entry");
    assert_eq!(last.status, JobStatus::Ok);
    assert!(
        system
            .persistence
            .job_log_repository
            .last_success(TRAIN_JOB)
            .await
            .unwrap()
            .is_some()
    );
}

/// Column-wise (min, max) of a matrix.
fn column_bounds(values: ArrayView2<f32>) -> (Array1<f32>, Array1<f32>) {
    let min = values.fold_axis(Axis(0), f32::INFINITY, |acc, &v| acc.min(v));
    let max = values.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &v| acc.max(v));
    (min, max)
}

#[tokio::test]
async fn test_published_scalers_fit_training_partition_only() {
    let candles = recent_candles(N_CANDLES);
    let system = trained_system(candles.clone()).await;
    let bytes = system.persistence.bundle_store.get("bundle.json").await.unwrap().unwrap();
    let manifest: BundleManifest = serde_json::from_slice(&bytes).unwrap();

    let frame = TechnicalFeatureProvider::default().build(&candles).unwrap();
    let windows = frame.len() - (SEQ_LEN - 1);
    // round(0.8 * 162) = 130
    let split = 130;
    assert_eq!(windows, 162);

    // Window j ends at row SEQ_LEN - 1 + j and carries that row's targets.
    let targets = frame.targets.values.view();
    let train_targets = targets.slice(s![SEQ_LEN - 1..SEQ_LEN - 1 + split, ..]);
    let (min_train, max_train) = column_bounds(train_targets);
    let (_, max_all) = column_bounds(targets.slice(s![SEQ_LEN - 1.., ..]));

    let scaler_y = &manifest.scaler_y;
    let fitted_min = scaler_y.data_min().expect("fitted scaler_y");
    let fitted_range = scaler_y.data_range().expect("fitted scaler_y");
    assert_eq!(fitted_min, &min_train);
    for ((r, hi), lo) in fitted_range.iter().zip(max_train.iter()).zip(min_train.iter()) {
        assert!((r - (hi - lo)).abs() < 1e-4, "range {} vs {}", r, hi - lo);
    }
    // The trending series peaks inside the holdout, so a full-set fit would differ.
    assert!(max_all.iter().zip(max_train.iter()).any(|(all, tr)| all > tr));

    // Training windows cover feature rows 0 ..= split + SEQ_LEN - 2.
    let train_features = frame.features.values.slice(s![..split + SEQ_LEN - 1, ..]);
    let (min_x, _) = column_bounds(train_features);
    assert_eq!(manifest.scaler_x.data_min().expect("fitted scaler_x"), &min_x);
}

#[tokio::test]
async fn test_training_with_short_history_fails_and_is_logged() {
    let system = in_memory_system(recent_candles(40));
    let outcome = system.train(None, None).await;

    assert!(!outcome.is_ok());
    assert!(outcome.message.contains("Insufficient history"), "{}", outcome.message);
    assert!(system.persistence.bundle_store.get("bundle.json").await.unwrap().is_none());

    let last = system
        .persistence
        .job_log_repository
        .latest(TRAIN_JOB)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.status, JobStatus::Error);
    assert!(
        system
            .persistence
            .job_log_repository
            .last_success(TRAIN_JOB)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_training_rejects_out_of_range_parameters() {
    let system = in_memory_system(recent_candles(N_CANDLES));

    for (days, decay) in [(Some(0), None), (Some(91), None), (None, Some(0.0)), (None, Some(1.5))] {
        let outcome = system.train(days, decay).await;
        assert!(!outcome.is_ok(), "days={:?} decay={:?} should be rejected", days, decay);
        assert!(outcome.message.contains("Invalid parameter"), "{}", outcome.message);
    }
}

#[tokio::test]
async fn test_series_after_training_is_complete() {
    let system = trained_system(recent_candles(N_CANDLES)).await;
    let outcome = system.predictor.predict_series(None).await;

    let SeriesOutcome::Complete { points } = outcome else {
        panic!("expected a complete series, got {:?}", outcome.degraded_reason());
    };
    assert_eq!(points.len(), N_CANDLES - WARMUP_ROWS - 1);

    // Rows before the first full window carry no prediction.
    for point in &points[..SEQ_LEN - 1] {
        assert!(point.pred.is_none());
        assert!(point.cls.is_none());
        assert!(point.err.is_none());
    }
    for point in &points[SEQ_LEN - 1..] {
        let pred = point.pred.as_ref().expect("prediction");
        assert_eq!(pred.len(), 5);
        let cls = point.cls.expect("direction");
        assert!((0.0..=1.0).contains(&cls.prob_up));
        assert!((cls.prob_up + cls.prob_down - 1.0).abs() < 1e-9);
    }

    // Errors compare against the next candle; the tail has none.
    let tail = points.last().unwrap();
    assert!(tail.pred.is_some());
    assert!(tail.err.is_none());

    let i = points.len() - 2;
    let err = points[i].err.expect("error against next row");
    let pred_close = points[i].pred.as_ref().unwrap()[CLOSE_TARGET];
    let next_close = points[i + 1].real.close;
    assert!((err.close_signed - (pred_close - next_close)).abs() < 1e-9);
    assert!((err.close_abs - err.close_signed.abs()).abs() < 1e-9);
    assert!(err.amp_abs.is_some());
}

#[tokio::test]
async fn test_series_range_limits_points() {
    let candles = recent_candles(N_CANDLES);
    let start = candles[50].timestamp;
    let end = candles[150].timestamp;
    let system = trained_system(candles).await;

    let outcome = system.predictor.predict_series(Some((start, end))).await;
    assert!(!outcome.is_degraded());
    // 101 candles in range, minus warm-up and the final row
    assert_eq!(outcome.points().len(), 101 - WARMUP_ROWS - 1);
    assert!(outcome.points().iter().all(|p| p.real.timestamp >= start && p.real.timestamp < end));
}

#[tokio::test]
async fn test_series_without_bundle_returns_realized_points() {
    let system = in_memory_system(recent_candles(N_CANDLES));
    let outcome = system.predictor.predict_series(None).await;

    assert!(matches!(
        outcome.degraded_reason(),
        Some(DegradedReason::BundleUnavailable(_))
    ));
    assert_eq!(outcome.points().len(), N_CANDLES - WARMUP_ROWS - 1);
    assert!(outcome.points().iter().all(|p| p.pred.is_none() && p.err.is_none()));
}

#[tokio::test]
async fn test_series_with_too_few_rows_is_empty() {
    let system = in_memory_system(recent_candles(20));
    let outcome = system.predictor.predict_series(None).await;

    assert!(matches!(
        outcome.degraded_reason(),
        Some(DegradedReason::InsufficientData(_))
    ));
    assert!(outcome.points().is_empty());
}

#[tokio::test]
async fn test_series_with_failing_history_is_upstream_failure() {
    let system = trained_system(recent_candles(N_CANDLES)).await;
    let predictor = SeriesPredictor::new(
        Arc::new(FailingHistory),
        Arc::new(TechnicalFeatureProvider::default()),
        system.cache.clone(),
    );

    let outcome = predictor.predict_series(None).await;
    assert!(matches!(
        outcome.degraded_reason(),
        Some(DegradedReason::UpstreamFailure(_))
    ));
    assert!(outcome.points().is_empty());
}

#[tokio::test]
async fn test_retraining_swaps_cached_bundle() {
    let system = trained_system(recent_candles(N_CANDLES)).await;
    let first = system.cache.get().await.unwrap();

    // Make sure the second run gets a distinct checkpoint key
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let outcome = system.train(None, None).await;
    assert!(outcome.is_ok(), "{}", outcome.message);
    assert!(!system.cache.is_loaded().await);

    let second = system.cache.get().await.unwrap();
    assert_ne!(first.manifest.model_key, second.manifest.model_key);
    // The old handle keeps working after the swap
    assert_eq!(first.seq_len(), SEQ_LEN);
}
