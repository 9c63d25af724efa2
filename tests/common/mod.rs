#![allow(dead_code)]

use candlecast::application::bootstrap::PersistenceHandle;
use candlecast::application::system::ForecastSystem;
use candlecast::config::Config;
use candlecast::domain::types::Candle;
use candlecast::infrastructure::InMemoryCandleRepository;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;

/// Rows dropped by the default feature provider before indicators settle.
pub const WARMUP_ROWS: usize = 34;
pub const SEQ_LEN: usize = 4;

/// Five-minute candles, the newest one at the last whole five minutes.
pub fn recent_candles(n: usize) -> Vec<Candle> {
    let now = Utc::now().timestamp();
    let last = Utc.timestamp_opt(now - now % 300, 0).unwrap();
    candles_ending_at(last, n)
}

pub fn candles_ending_at(last: DateTime<Utc>, n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let step = i as f64;
            let close = 100.0 + (step * 0.25).sin() * 4.0 + step * 0.05;
            Candle {
                timestamp: last - Duration::minutes(5 * (n - 1 - i) as i64),
                open: close - 0.4 * (step * 0.7).cos(),
                high: close + 1.0 + (step * 0.3).sin().abs(),
                low: close - 1.2,
                close,
                volume: 1_000.0 + (i % 17) as f64 * 25.0,
            }
        })
        .collect()
}

/// Settings small enough to train in a test.
pub fn test_settings() -> HashMap<String, String> {
    [
        ("LSTM_SEQ_LEN", "4"),
        ("LSTM_EPOCHS", "3"),
        ("LSTM_BATCH_SIZE", "16"),
        ("LSTM_PATIENCE", "2"),
        ("LSTM_HIDDEN_UNITS", "8"),
        ("MIN_HISTORY_ROWS", "60"),
        ("LOOKBACK_DAYS", "7"),
        ("OBSERVABILITY_ENABLED", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn test_config() -> Config {
    Config::from_source(&test_settings()).expect("test settings should be valid")
}

pub fn in_memory_system(candles: Vec<Candle>) -> ForecastSystem {
    let persistence =
        PersistenceHandle::with_candles(InMemoryCandleRepository::with_candles(candles));
    ForecastSystem::assemble(test_config(), persistence).expect("system should assemble")
}

/// A system that already published one bundle.
pub async fn trained_system(candles: Vec<Candle>) -> ForecastSystem {
    let system = in_memory_system(candles);
    let outcome = system.train(None, None).await;
    assert!(outcome.is_ok(), "training should succeed: {}", outcome.message);
    system
}
