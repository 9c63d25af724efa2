pub mod bundle_store;
pub mod candle_file;
pub mod features;
pub mod ml;
pub mod observability;
pub mod persistence;
pub mod repositories;

pub use bundle_store::{FileBundleStore, InMemoryBundleStore};
pub use features::TechnicalFeatureProvider;
pub use ml::DenseNetworkFactory;
pub use repositories::{
    InMemoryCandleRepository, InMemoryFuturesRepository, InMemoryJobLogRepository,
};
