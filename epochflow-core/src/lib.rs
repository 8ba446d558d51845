//! # Epochflow Core
//!
//! Core library for epochflow training runs.
//! Provides the network manager and its main loop, the hook lifecycle with
//! built-in hooks, component registries, run configuration and output
//! directory management.

pub mod config;
pub mod datasets;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod models;
pub mod output;
pub mod persistence;
pub mod profile;
pub mod registry;
pub mod training;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{ComponentConfig, EvalConfig, HookConfig, ModelConfig, RunConfig};
pub use datasets::{Dataset, InMemoryDataset, LinearSynthetic, Stream};
pub use error::{
    ConfigError, DatasetError, FlowError, HookError, ModelError, RegistryError, Result,
};
pub use hooks::Hook;
pub use manager::{MainLoopConfig, MainLoopOutcome, NetworkManager, OnUnusedSources};
pub use models::{LinearRegression, Model};
pub use output::{
    PruneReport, TraceHook, TrainingTrace, create_output_dir, is_train_dir, prune_train_dirs,
};
pub use profile::EpochProfile;
pub use registry::{BuildContext, Components, Registry};
pub use training::Training;
pub use types::{
    Batch, BatchResult, BatchValue, EpochData, MetricValue, StreamData, TEST_STREAM,
    TRAIN_STREAM, VALID_STREAM,
};
