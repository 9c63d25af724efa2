pub mod technical;

pub use technical::{FEATURE_COLS, TechnicalFeatureConfig, TechnicalFeatureProvider};
