use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::ports::FeatureTargetProvider;
use crate::domain::types::{Candle, FeatureTargetFrame, Frame, TARGET_REG_COLS};
use ndarray::{Array1, Array2};
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use ta::{DataItem, Next};

pub const FEATURE_COLS: &[&str] = &[
    "open",
    "high",
    "low",
    "close",
    "volume",
    "log_return",
    "amplitude",
    "rsi",
    "macd_hist",
    "ema_spread",
    "bb_position",
    "bb_width",
    "atr_pct",
];

#[derive(Debug, Clone, PartialEq)]
pub struct TechnicalFeatureConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub atr_period: usize,
    /// Leading rows dropped while indicators settle.
    pub warmup_rows: usize,
}

impl Default for TechnicalFeatureConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: 2.0,
            atr_period: 14,
            warmup_rows: 34,
        }
    }
}

struct Indicators {
    rsi: RelativeStrengthIndex,
    macd: MovingAverageConvergenceDivergence,
    ema_fast: ExponentialMovingAverage,
    ema_slow: ExponentialMovingAverage,
    bb: BollingerBands,
    atr: AverageTrueRange,
}

fn invalid(name: &'static str, err: impl std::fmt::Debug) -> ForecastError {
    ForecastError::InvalidParameter {
        name,
        reason: format!("{:?}", err),
    }
}

impl Indicators {
    fn new(config: &TechnicalFeatureConfig) -> ForecastResult<Self> {
        Ok(Self {
            rsi: RelativeStrengthIndex::new(config.rsi_period)
                .map_err(|e| invalid("rsi_period", e))?,
            macd: MovingAverageConvergenceDivergence::new(
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
            )
            .map_err(|e| invalid("macd", e))?,
            ema_fast: ExponentialMovingAverage::new(config.macd_fast)
                .map_err(|e| invalid("macd_fast", e))?,
            ema_slow: ExponentialMovingAverage::new(config.macd_slow)
                .map_err(|e| invalid("macd_slow", e))?,
            bb: BollingerBands::new(config.bb_period, config.bb_std_dev)
                .map_err(|e| invalid("bb", e))?,
            atr: AverageTrueRange::new(config.atr_period).map_err(|e| invalid("atr_period", e))?,
        })
    }
}

fn finite_or_zero(v: f64) -> f32 {
    if v.is_finite() { v as f32 } else { 0.0 }
}

/// Technical-indicator features over raw OHLCV, with next-candle targets.
///
/// Indicators are recomputed from scratch on every call, so the output only
/// depends on the rows passed in.
#[derive(Debug, Clone, Default)]
pub struct TechnicalFeatureProvider {
    config: TechnicalFeatureConfig,
}

impl TechnicalFeatureProvider {
    pub fn new(config: TechnicalFeatureConfig) -> Self {
        Self { config }
    }

    pub fn feature_cols() -> Vec<String> {
        FEATURE_COLS.iter().map(|c| c.to_string()).collect()
    }

    fn feature_row(
        indicators: &mut Indicators,
        prev_close: Option<f64>,
        candle: &Candle,
    ) -> ForecastResult<[f32; 13]> {
        let item = DataItem::builder()
            .open(candle.open)
            .high(candle.high)
            .low(candle.low)
            .close(candle.close)
            .volume(candle.volume)
            .build()
            .map_err(|e| ForecastError::InvalidParameter {
                name: "candles",
                reason: format!("invalid candle at {}: {:?}", candle.timestamp, e),
            })?;

        let rsi = indicators.rsi.next(candle.close);
        let macd = indicators.macd.next(candle.close);
        let ema_fast = indicators.ema_fast.next(candle.close);
        let ema_slow = indicators.ema_slow.next(candle.close);
        let bb = indicators.bb.next(candle.close);
        let atr = indicators.atr.next(&item);

        let log_return = prev_close.map_or(0.0, |p| (candle.close / p).ln());
        let band = bb.upper - bb.lower;

        Ok([
            candle.open as f32,
            candle.high as f32,
            candle.low as f32,
            candle.close as f32,
            candle.volume as f32,
            finite_or_zero(log_return),
            candle.amplitude() as f32,
            finite_or_zero(rsi / 100.0),
            finite_or_zero(macd.histogram),
            finite_or_zero((ema_fast - ema_slow) / ema_slow),
            finite_or_zero((candle.close - bb.lower) / band),
            finite_or_zero(band / bb.average),
            finite_or_zero(atr / candle.close),
        ])
    }
}

impl FeatureTargetProvider for TechnicalFeatureProvider {
    fn build(&self, rows: &[Candle]) -> ForecastResult<FeatureTargetFrame> {
        let mut indicators = Indicators::new(&self.config)?;
        let start = self.config.warmup_rows;
        // The last row has no successor to describe.
        let end = rows.len().saturating_sub(1);
        let n = end.saturating_sub(start);

        let mut features = Array2::<f32>::zeros((n, FEATURE_COLS.len()));
        let mut targets = Array2::<f32>::zeros((n, TARGET_REG_COLS.len()));
        let mut direction = Array1::<u8>::zeros(n);
        let mut kept = Vec::with_capacity(n);

        let mut prev_close = None;
        for (i, candle) in rows.iter().enumerate() {
            let row = Self::feature_row(&mut indicators, prev_close, candle)?;
            prev_close = Some(candle.close);
            if i < start || i >= end {
                continue;
            }

            let out = i - start;
            let next = &rows[i + 1];
            for (j, v) in row.iter().enumerate() {
                features[[out, j]] = *v;
            }
            targets[[out, 0]] = next.open as f32;
            targets[[out, 1]] = next.high as f32;
            targets[[out, 2]] = next.low as f32;
            targets[[out, 3]] = next.close as f32;
            targets[[out, 4]] = next.amplitude() as f32;
            direction[out] = u8::from(next.close > candle.close);
            kept.push(*candle);
        }

        Ok(FeatureTargetFrame {
            rows: kept,
            features: Frame::new(Self::feature_cols(), features)?,
            targets: Frame::new(
                TARGET_REG_COLS.iter().map(|c| c.to_string()).collect(),
                targets,
            )?,
            direction,
        })
    }
}
