//! Network manager: runs batches and epochs and dispatches hooks.
//!
//! The manager owns the dataset, the model and the hooks. One call to
//! [`NetworkManager::run_main_loop`] drives the whole training:
//!
//! 1. `before_training` on every hook,
//! 2. a baseline evaluation of the extra streams (epoch 0),
//! 3. `extend_epoch_data` and `before_first_epoch` with the baseline,
//! 4. train + evaluate epochs, each followed by the `extend_epoch_data`,
//!    `after_epoch` and `after_epoch_profile` rounds, until a hook asks to
//!    terminate,
//! 5. `after_training` on every hook.

use crate::datasets::{Dataset, Stream};
use crate::error::{ConfigError, HookError, ModelError, Result};
use crate::hooks::Hook;
use crate::models::Model;
use crate::profile::{AFTER_BATCH_HOOKS, AFTER_EPOCH_HOOKS, EVAL_BATCH, EpochProfile, READ_BATCH};
use crate::types::{
    Batch, BatchResult, EpochAccumulator, EpochData, StreamData, TRAIN_STREAM, VALID_STREAM,
    batch_size,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to do with batch sources the model does not consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnusedSources {
    Error,
    Warn,
    #[default]
    Ignore,
}

/// The `main_loop` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MainLoopConfig {
    pub batch_size: usize,
    /// Evaluation batch size relative to `batch_size`.
    pub eval_batch_size_multiplier: f64,
    /// Streams evaluated after every training epoch.
    pub extra_streams: Vec<String>,
    pub skip_incomplete_batches: bool,
    pub on_unused_sources: OnUnusedSources,
}

impl Default for MainLoopConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            eval_batch_size_multiplier: 1.0,
            extra_streams: vec![VALID_STREAM.to_string()],
            skip_incomplete_batches: true,
            on_unused_sources: OnUnusedSources::Ignore,
        }
    }
}

impl MainLoopConfig {
    /// `max(1, floor(batch_size * eval_batch_size_multiplier))`.
    pub fn eval_batch_size(&self) -> usize {
        ((self.batch_size as f64 * self.eval_batch_size_multiplier).floor() as usize).max(1)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "main_loop.batch_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(self.eval_batch_size_multiplier.is_finite() && self.eval_batch_size_multiplier > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "main_loop.eval_batch_size_multiplier".into(),
                message: format!("must be positive, got {}", self.eval_batch_size_multiplier),
            });
        }
        if self.extra_streams.iter().any(|s| s == TRAIN_STREAM) {
            return Err(ConfigError::InvalidValue {
                key: "main_loop.extra_streams".into(),
                message: format!("`{TRAIN_STREAM}` is always run and can not be an extra stream"),
            });
        }
        Ok(())
    }
}

/// How the main loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainLoopOutcome {
    pub epochs_done: usize,
    /// Reason given by the first hook that terminated the training.
    pub terminated_by: Option<String>,
}

/// Owns the dataset, model and hooks of a run and drives the main loop.
pub struct NetworkManager {
    dataset: Box<dyn Dataset>,
    model: Box<dyn Model>,
    hooks: Vec<Box<dyn Hook>>,
    config: MainLoopConfig,
    warned_sources: BTreeSet<String>,
    profile: EpochProfile,
}

impl NetworkManager {
    pub fn new(
        dataset: Box<dyn Dataset>,
        model: Box<dyn Model>,
        hooks: Vec<Box<dyn Hook>>,
        config: MainLoopConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dataset,
            model,
            hooks,
            config,
            warned_sources: BTreeSet::new(),
            profile: EpochProfile::new(),
        })
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn config(&self) -> &MainLoopConfig {
        &self.config
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    /// Append a hook; it runs after all hooks registered so far.
    pub fn add_hook(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Run the model on one batch and return its declared outputs.
    ///
    /// Only the sources named by [`Model::input_names`] reach the model; the
    /// rest are handled by the `on_unused_sources` policy.
    pub fn run_batch(&mut self, batch: &Batch, train: bool) -> Result<BatchResult> {
        let inputs = self.model.input_names();
        for source in batch.keys().filter(|source| !inputs.contains(source)) {
            match self.config.on_unused_sources {
                OnUnusedSources::Error => {
                    return Err(ModelError::UnusedSource {
                        name: source.clone(),
                    }
                    .into());
                }
                OnUnusedSources::Warn => {
                    if self.warned_sources.insert(source.clone()) {
                        warn!(source = %source, "Source is not used by the model");
                    }
                }
                OnUnusedSources::Ignore => {}
            }
        }

        let mut model_batch = Batch::new();
        for input in inputs {
            let column = batch.get(input).ok_or_else(|| ModelError::MissingInput {
                name: input.clone(),
            })?;
            model_batch.insert(input.clone(), column.clone());
        }

        let mut outputs = self.model.run(&model_batch, train)?;
        let mut result = BatchResult::new();
        for output in self.model.output_names() {
            let value = outputs.remove(output).ok_or_else(|| ModelError::MissingOutput {
                name: output.clone(),
            })?;
            result.insert(output.clone(), value);
        }
        Ok(result)
    }

    /// Run one epoch over `stream` and return the per-output means.
    ///
    /// `after_batch` is called on every hook after each processed batch.
    pub fn run_epoch(
        &mut self,
        stream_name: &str,
        mut stream: Stream,
        train: bool,
        expected_batch_size: usize,
    ) -> Result<StreamData> {
        let read_key = EpochProfile::key(READ_BATCH, stream_name);
        let eval_key = EpochProfile::key(EVAL_BATCH, stream_name);
        let hooks_key = EpochProfile::key(AFTER_BATCH_HOOKS, stream_name);
        let mut accumulator = EpochAccumulator::new();
        let mut skipped = 0usize;

        loop {
            let start = Instant::now();
            let Some(batch) = stream.next() else {
                break;
            };
            self.profile.record(read_key.as_str(), start.elapsed());

            let size = batch_size(&batch);
            if self.config.skip_incomplete_batches && size != expected_batch_size {
                debug!(stream = stream_name, size, expected_batch_size, "Skipping incomplete batch");
                skipped += 1;
                continue;
            }

            let start = Instant::now();
            let result = self.run_batch(&batch, train)?;
            self.profile.record(eval_key.as_str(), start.elapsed());
            accumulator.add(&result)?;

            let start = Instant::now();
            for hook in self.hooks.iter_mut() {
                hook.after_batch(stream_name, &result)?;
            }
            self.profile.record(hooks_key.as_str(), start.elapsed());
        }

        debug!(
            stream = stream_name,
            train,
            batches = accumulator.batches(),
            skipped,
            "Epoch over stream finished"
        );
        Ok(accumulator.into_stream_data())
    }

    /// Evaluate each of `streams` once, without training.
    fn evaluate_streams(&mut self, streams: &[String]) -> Result<EpochData> {
        let eval_batch_size = self.config.eval_batch_size();
        let mut epoch_data = EpochData::new();
        for name in streams {
            let stream = self.dataset.stream(name, eval_batch_size)?;
            let data = self.run_epoch(name, stream, false, eval_batch_size)?;
            epoch_data.insert_stream(name.clone(), data);
        }
        Ok(epoch_data)
    }

    /// Let every hook add to the epoch data before anyone reads it.
    fn extend_epoch_data(
        &mut self,
        epoch_id: usize,
        epoch_data: &mut EpochData,
    ) -> std::result::Result<(), HookError> {
        for hook in self.hooks.iter_mut() {
            hook.extend_epoch_data(epoch_id, epoch_data)?;
        }
        Ok(())
    }

    /// Call `after_epoch` on every hook and collect the first termination reason.
    ///
    /// A termination does not cut the round short; any other error does.
    fn after_epoch_round(
        &mut self,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> std::result::Result<Option<String>, HookError> {
        let mut terminated_by = None;
        for hook in self.hooks.iter_mut() {
            match hook.after_epoch(self.model.as_ref(), epoch_id, epoch_data) {
                Ok(()) => {}
                Err(HookError::TrainingTerminated { reason }) => {
                    info!(hook = hook.name(), epoch_id, %reason, "Training termination requested");
                    terminated_by.get_or_insert(reason);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(terminated_by)
    }

    /// Train until a hook terminates the training.
    pub fn run_main_loop(&mut self) -> Result<MainLoopOutcome> {
        let extra_streams = self.config.extra_streams.clone();
        let batch_size = self.config.batch_size;

        for hook in self.hooks.iter_mut() {
            hook.before_training(self.model.as_ref())?;
        }

        info!(streams = ?extra_streams, "Evaluating the baseline");
        let mut baseline = self.evaluate_streams(&extra_streams)?;
        self.extend_epoch_data(0, &mut baseline)?;
        for hook in self.hooks.iter_mut() {
            hook.before_first_epoch(self.model.as_ref(), &baseline)?;
        }

        let mut epoch_id = 0;
        let terminated_by = loop {
            epoch_id += 1;
            self.profile.clear();
            info!(epoch_id, "Training epoch");

            let train = self.dataset.stream(TRAIN_STREAM, batch_size)?;
            let train_data = self.run_epoch(TRAIN_STREAM, train, true, batch_size)?;
            let mut epoch_data = self.evaluate_streams(&extra_streams)?;
            epoch_data.insert_stream(TRAIN_STREAM, train_data);

            let start = Instant::now();
            self.extend_epoch_data(epoch_id, &mut epoch_data)?;
            let termination = self.after_epoch_round(epoch_id, &epoch_data)?;
            self.profile.record(AFTER_EPOCH_HOOKS, start.elapsed());

            for hook in self.hooks.iter_mut() {
                hook.after_epoch_profile(epoch_id, &self.profile, &extra_streams)?;
            }

            if let Some(reason) = termination {
                info!(epoch_id, %reason, "Training terminated");
                break Some(reason);
            }
        };

        for hook in self.hooks.iter_mut() {
            hook.after_training(self.model.as_ref())?;
        }
        info!(epochs_done = epoch_id, "Training finished");

        Ok(MainLoopOutcome {
            epochs_done: epoch_id,
            terminated_by,
        })
    }

    /// Evaluate the model on a single stream, dispatching hooks as for epoch 0.
    ///
    /// Termination requested by `after_epoch` is logged and otherwise ignored.
    pub fn run_evaluation(&mut self, stream_name: &str) -> Result<EpochData> {
        for hook in self.hooks.iter_mut() {
            hook.before_training(self.model.as_ref())?;
        }

        info!(stream = stream_name, "Evaluating");
        let mut epoch_data = self.evaluate_streams(&[stream_name.to_string()])?;
        self.extend_epoch_data(0, &mut epoch_data)?;

        if let Some(reason) = self.after_epoch_round(0, &epoch_data)? {
            debug!(%reason, "Ignoring termination request during evaluation");
        }

        for hook in self.hooks.iter_mut() {
            hook.after_training(self.model.as_ref())?;
        }
        Ok(epoch_data)
    }
}
