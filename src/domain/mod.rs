// Core data model
pub mod types;

// Windowing, scaling, model capabilities, bundles
pub mod ml;

// Retrain policy, futures records, series results, job outcomes
pub mod forecasting;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
