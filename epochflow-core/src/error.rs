//! Error types for the epochflow core.
//!
//! Uses `thiserror` for public API error types with structured variants per
//! domain: configuration, component registry, datasets, models and hooks.

use std::path::PathBuf;

/// Top-level error type for the epochflow core library.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Creating {component} failed")]
    Creation {
        component: String,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Wrap an error raised while constructing a run component.
    pub fn creation(component: impl Into<String>, source: FlowError) -> Self {
        Self::Creation {
            component: component.into(),
            source: Box::new(source),
        }
    }
}

/// Errors from loading and validating the run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Key `{key}` is reserved and can not be used in the `{section}` section")]
    ReservedKey { key: String, section: String },

    #[error("Invalid hook entry: {message}")]
    InvalidHookEntry { message: String },

    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unrecognized argument `{arg}`, [name]=[value] expected")]
    InvalidOverride { arg: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from resolving identifiers and constructing components.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown {kind} identifier `{name}`")]
    UnknownIdentifier { kind: String, name: String },

    #[error("{kind} `{name}` is already registered")]
    AlreadyRegistered { kind: String, name: String },

    #[error("Invalid arguments for {kind} `{name}`: {message}")]
    InvalidArguments {
        kind: String,
        name: String,
        message: String,
    },
}

/// Errors raised by datasets and their streams.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Stream `{name}` is not provided by the dataset")]
    UnknownStream { name: String },

    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("Invalid dataset: {message}")]
    Invalid { message: String },
}

/// Errors raised while running, saving or restoring a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Input `{name}` required by the model is missing from the batch")]
    MissingInput { name: String },

    #[error("Output `{name}` declared by the model was not produced")]
    MissingOutput { name: String },

    #[error("Source `{name}` is not used by the model")]
    UnusedSource { name: String },

    #[error("Output `{name}` changed shape between batches")]
    ShapeMismatch { name: String },

    #[error("Failed to save the model: {message}")]
    Save { message: String },

    #[error("Failed to restore the model from {path}: {message}")]
    Restore { path: PathBuf, message: String },

    #[error("Invalid model: {message}")]
    Invalid { message: String },
}

/// Errors returned from hook callbacks.
///
/// [`HookError::TrainingTerminated`] is the termination signal: returned from
/// `after_epoch` it ends the main loop after the current round of hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Training terminated: {reason}")]
    TrainingTerminated { reason: String },

    #[error("Stream `{stream}` was not found in the epoch data, available streams are {available:?}")]
    MissingStream {
        stream: String,
        available: Vec<String>,
    },

    #[error("Variable `{variable}` was not found in stream `{stream}`, available variables are {available:?}")]
    MissingVariable {
        variable: String,
        stream: String,
        available: Vec<String>,
    },

    #[error("Aggregation `{aggregation}` was not found for variable `{variable}`")]
    MissingAggregation {
        variable: String,
        aggregation: String,
    },

    #[error("Variable `{variable}` is expected to be aggregated")]
    NotAggregated { variable: String },

    #[error("Variable `{variable}` is not a scalar")]
    NotScalar { variable: String },

    #[error("Variable `{variable}` of stream `{stream}` can not be handled: {message}")]
    UnsupportedValue {
        variable: String,
        stream: String,
        message: String,
    },

    #[error("{stream} {variable} was only {value} in epoch {epoch_id}, but {required} was required")]
    ThresholdNotReached {
        stream: String,
        variable: String,
        value: f64,
        epoch_id: usize,
        required: f64,
    },

    #[error("Saving the model failed")]
    SaveFailed(#[source] ModelError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HookError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::TrainingTerminated {
            reason: reason.into(),
        }
    }

    /// Whether this is the termination signal rather than a failure.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::TrainingTerminated { .. })
    }
}

/// A type alias for results using the top-level `FlowError`.
pub type Result<T> = std::result::Result<T, FlowError>;
