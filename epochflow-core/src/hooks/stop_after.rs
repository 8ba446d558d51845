//! Stop training after a number of epochs, iterations or minutes.

use super::Hook;
use crate::error::{ConfigError, HookError};
use crate::models::Model;
use crate::types::{BatchResult, EpochData, TRAIN_STREAM};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StopAfterArgs {
    pub epochs: Option<usize>,
    /// Number of train batches.
    pub iterations: Option<usize>,
    pub minutes: Option<f64>,
}

/// Terminates training once any of the configured limits is reached.
///
/// Limits are checked after every epoch, so an iteration or time limit may be
/// overshot by up to one epoch.
#[derive(Debug, Clone)]
pub struct StopAfter {
    epochs: Option<usize>,
    iterations: Option<usize>,
    duration: Option<Duration>,
    iterations_done: usize,
    started: Instant,
}

impl StopAfter {
    pub fn new(args: StopAfterArgs) -> Result<Self, ConfigError> {
        if args.epochs.is_none() && args.iterations.is_none() && args.minutes.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "StopAfter".into(),
                message: "at least one of `epochs`, `iterations` or `minutes` must be set".into(),
            });
        }
        let duration = args
            .minutes
            .map(|minutes| {
                Duration::try_from_secs_f64(minutes * 60.0).map_err(|e| ConfigError::InvalidValue {
                    key: "minutes".into(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            epochs: args.epochs,
            iterations: args.iterations,
            duration,
            iterations_done: 0,
            started: Instant::now(),
        })
    }

    fn check(&self, epoch_id: usize) -> Result<(), HookError> {
        if let Some(epochs) = self.epochs
            && epoch_id >= epochs
        {
            return Err(HookError::terminated(format!(
                "Training terminated after epoch {epoch_id}"
            )));
        }
        if let Some(iterations) = self.iterations
            && self.iterations_done >= iterations
        {
            return Err(HookError::terminated(format!(
                "Training terminated after iteration {}",
                self.iterations_done
            )));
        }
        if let Some(duration) = self.duration {
            let elapsed = self.started.elapsed();
            if elapsed >= duration {
                return Err(HookError::terminated(format!(
                    "Training terminated after {:.1} minutes",
                    elapsed.as_secs_f64() / 60.0
                )));
            }
        }
        Ok(())
    }
}

impl Hook for StopAfter {
    fn before_training(&mut self, _model: &dyn Model) -> Result<(), HookError> {
        self.started = Instant::now();
        self.iterations_done = 0;
        Ok(())
    }

    fn after_batch(&mut self, stream_name: &str, _batch: &BatchResult) -> Result<(), HookError> {
        if stream_name == TRAIN_STREAM {
            self.iterations_done += 1;
        }
        Ok(())
    }

    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        self.check(epoch_id)
    }
}
