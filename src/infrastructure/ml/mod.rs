pub mod dense_network;

pub use dense_network::{DenseMultitaskNetwork, DenseNetworkFactory, DenseScorer};
