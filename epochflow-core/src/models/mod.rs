//! Models trained and evaluated by the main loop.
//!
//! The numeric backend lives behind [`Model`]; the manager only moves batches
//! in and batch results out.

pub mod linear;

pub use linear::{LinearArgs, LinearParams, LinearRegression};

use crate::error::ModelError;
use crate::types::{Batch, BatchResult};
use std::path::PathBuf;

/// A trainable model with named inputs and outputs.
pub trait Model {
    /// Batch sources the model consumes.
    fn input_names(&self) -> &[String];

    /// Outputs every call to [`Model::run`] must produce.
    fn output_names(&self) -> &[String];

    /// Evaluate one batch, updating the parameters when `train` is set.
    ///
    /// The batch holds exactly the sources named by [`Model::input_names`].
    fn run(&mut self, batch: &Batch, train: bool) -> Result<BatchResult, ModelError>;

    /// Persist the parameters under the given name suffix and return the path.
    fn save(&self, suffix: &str) -> Result<PathBuf, ModelError>;

    /// Identifier of the model that can restore checkpoints written by this one.
    fn restore_fallback(&self) -> &str;
}
