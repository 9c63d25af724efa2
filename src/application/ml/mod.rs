pub mod auto_train;
pub mod bundle_cache;
pub mod training;

pub use auto_train::{AutoTrainOutcome, AutoTrainer};
pub use bundle_cache::BundleCache;
pub use training::{TrainingConfig, TrainingOrchestrator};
