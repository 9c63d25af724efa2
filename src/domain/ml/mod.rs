pub mod bundle;
pub mod metrics;
pub mod model;
pub mod scaler;
pub mod sequence;

pub use bundle::{BundleManifest, BundlePrediction, ModelBundle};
pub use metrics::{HoldoutMetrics, exp_sample_weights};
pub use model::{ModelFactory, ModelOutput, ModelSpec, Scorer, TrainableModel, TrainingSet};
pub use scaler::{MinMaxScaler, Scaler};
pub use sequence::{
    SequenceDataset, build_inference_sequences, build_sequences, temporal_split_index,
};
