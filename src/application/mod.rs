// Composition of stores at startup
pub mod bootstrap;

// Series prediction and futures reconciliation
pub mod forecasting;

// Training, retrain policy and bundle caching
pub mod ml;

// Periodic jobs for the long-running process
pub mod scheduler;

// System orchestrator
pub mod system;
