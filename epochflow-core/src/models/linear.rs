//! One-dimensional linear regression trained by plain SGD.

use super::Model;
use crate::error::{ModelError, Result};
use crate::persistence::{atomic_write_json, load_json};
use crate::registry::BuildContext;
use crate::types::{Batch, BatchResult, BatchValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Keyword arguments of [`LinearRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearArgs {
    pub learning_rate: f64,
    pub weight: f64,
    pub bias: f64,
}

impl Default for LinearArgs {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            weight: 0.0,
            bias: 0.0,
        }
    }
}

/// Checkpoint contents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub weight: f64,
    pub bias: f64,
}

/// `y ≈ weight * x + bias`, reporting `loss` (MSE) and `mae` per batch.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    params: LinearParams,
    learning_rate: f64,
    output_dir: Option<PathBuf>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl LinearRegression {
    pub const IDENTIFIER: &'static str = "epochflow.models.LinearRegression";

    pub fn new(args: LinearArgs, output_dir: Option<PathBuf>) -> Self {
        Self {
            params: LinearParams {
                weight: args.weight,
                bias: args.bias,
            },
            learning_rate: args.learning_rate,
            output_dir,
            inputs: vec!["x".to_string(), "y".to_string()],
            outputs: vec!["loss".to_string(), "mae".to_string()],
        }
    }

    /// Construct from configuration, restoring parameters when requested.
    pub fn build(ctx: &BuildContext<'_>) -> Result<Self> {
        let mut model = Self::new(ctx.parse_args()?, ctx.output_dir.map(Path::to_path_buf));
        if let Some(path) = ctx.restore_from {
            model.restore(path)?;
        }
        Ok(model)
    }

    pub fn params(&self) -> LinearParams {
        self.params
    }

    /// Load parameters from a checkpoint file, or from a run directory
    /// (`model_latest.json`, then `model_best.json`).
    pub fn restore(&mut self, path: &Path) -> std::result::Result<(), ModelError> {
        let checkpoint = if path.is_dir() {
            ["model_latest.json", "model_best.json"]
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| ModelError::Restore {
                    path: path.to_path_buf(),
                    message: "no model_latest.json or model_best.json checkpoint found".into(),
                })?
        } else {
            path.to_path_buf()
        };

        let params: LinearParams = load_json(&checkpoint)
            .map_err(|e| ModelError::Restore {
                path: checkpoint.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ModelError::Restore {
                path: checkpoint.clone(),
                message: "file does not exist".into(),
            })?;
        info!(path = %checkpoint.display(), weight = params.weight, bias = params.bias, "Restored model");
        self.params = params;
        Ok(())
    }

    fn column<'a>(batch: &'a Batch, name: &str) -> std::result::Result<&'a [f64], ModelError> {
        batch
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::MissingInput {
                name: name.to_string(),
            })
    }
}

impl Model for LinearRegression {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&mut self, batch: &Batch, train: bool) -> std::result::Result<BatchResult, ModelError> {
        let xs = Self::column(batch, "x")?;
        let ys = Self::column(batch, "y")?;
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(ModelError::Invalid {
                message: format!("expected equally long non-empty x and y, got {} and {}", xs.len(), ys.len()),
            });
        }

        let n = xs.len() as f64;
        let LinearParams { weight, bias } = self.params;
        let (mut squared, mut absolute, mut grad_w, mut grad_b) = (0.0, 0.0, 0.0, 0.0);
        for (x, y) in xs.iter().zip(ys) {
            let residual = weight * x + bias - y;
            squared += residual * residual;
            absolute += residual.abs();
            grad_w += residual * x;
            grad_b += residual;
        }

        if train {
            self.params.weight -= self.learning_rate * 2.0 * grad_w / n;
            self.params.bias -= self.learning_rate * 2.0 * grad_b / n;
        }

        Ok(BatchResult::from([
            ("loss".to_string(), BatchValue::Scalar(squared / n)),
            ("mae".to_string(), BatchValue::Scalar(absolute / n)),
        ]))
    }

    fn save(&self, suffix: &str) -> std::result::Result<PathBuf, ModelError> {
        let dir = self.output_dir.as_ref().ok_or_else(|| ModelError::Save {
            message: "the model has no output directory".into(),
        })?;
        let path = dir.join(format!("model_{suffix}.json"));
        atomic_write_json(&path, &self.params).map_err(|e| ModelError::Save {
            message: format!("{}: {e}", path.display()),
        })?;
        debug!(path = %path.display(), "Saved model");
        Ok(path)
    }

    fn restore_fallback(&self) -> &str {
        Self::IDENTIFIER
    }
}
