pub mod predictor;
pub mod reconciler;

pub use predictor::SeriesPredictor;
pub use reconciler::{FuturesReconciler, ReconcileOutcome};
