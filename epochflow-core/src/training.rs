//! Building a run from its configuration and executing it.
//!
//! [`Training`] resolves the dataset, model and hooks of a [`RunConfig`]
//! through the [`Components`] registries, dumps the effective configuration
//! into the output directory and then trains or evaluates.

use crate::config::{HookConfig, RunConfig};
use crate::datasets::Dataset;
use crate::error::{ConfigError, FlowError, Result};
use crate::hooks::Hook;
use crate::manager::{MainLoopOutcome, NetworkManager};
use crate::models::Model;
use crate::output::{TraceHook, TrainingTrace};
use crate::registry::{BuildContext, Components};
use crate::types::EpochData;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// A configured run bound to its output directory.
pub struct Training {
    config: RunConfig,
    output_dir: PathBuf,
    restore_from: Option<PathBuf>,
    components: Components,
}

impl Training {
    pub fn new(config: RunConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            restore_from: None,
            components: Components::builtin(),
        }
    }

    /// Restore the model from a checkpoint file or a run directory.
    pub fn with_restore_from(mut self, restore_from: Option<PathBuf>) -> Self {
        self.restore_from = restore_from;
        self
    }

    /// Use custom registries instead of the built-in ones.
    pub fn with_components(mut self, components: Components) -> Self {
        self.components = components;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn create_dataset(&self) -> Result<Box<dyn Dataset>> {
        let class = self
            .config
            .dataset
            .class
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "dataset.class".into(),
            })?;
        let ctx = BuildContext::new(&self.config.dataset.args)
            .with_output_dir(Some(self.output_dir.as_path()));
        let dataset = self.components.datasets.create(class, &ctx)?;
        info!(class, "Dataset created");
        Ok(dataset)
    }

    /// Create the model, falling back to `model.restore_fallback` when a
    /// restore was requested and the primary class failed.
    pub fn create_model(&self) -> Result<Box<dyn Model>> {
        let model = &self.config.model;
        let class = model
            .class
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "model.class".into(),
            })?;
        let ctx = BuildContext::new(&model.args)
            .with_output_dir(Some(self.output_dir.as_path()))
            .with_restore_from(self.restore_from.as_deref());

        match self.components.models.create(class, &ctx) {
            Ok(created) => {
                info!(class, "Model created");
                Ok(created)
            }
            Err(err) if self.restore_from.is_some() => {
                warn!(class, error = %err, "Restoring the model failed, trying the restore fallback");
                let fallback =
                    model
                        .restore_fallback
                        .as_deref()
                        .ok_or_else(|| ConfigError::MissingField {
                            field: "model.restore_fallback".into(),
                        })?;
                let created = self.components.models.create(fallback, &ctx)?;
                info!(class = fallback, "Model created from the restore fallback");
                Ok(created)
            }
            Err(err) => Err(err),
        }
    }

    /// Create hooks in the order they are listed.
    pub fn create_hooks(&self, entries: &[HookConfig]) -> Result<Vec<Box<dyn Hook>>> {
        let mut hooks = Vec::with_capacity(entries.len());
        for entry in entries {
            let ctx = BuildContext::new(&entry.args)
                .with_output_dir(Some(self.output_dir.as_path()))
                .with_restore_from(self.restore_from.as_deref());
            match self.components.hooks.create(&entry.identifier, &ctx) {
                Ok(hook) => hooks.push(hook),
                Err(err) => {
                    error!(
                        hook = %entry.identifier,
                        args = ?entry.args,
                        error = %err,
                        "Creating hook failed"
                    );
                    return Err(err);
                }
            }
        }
        info!(count = hooks.len(), "Hooks created");
        Ok(hooks)
    }

    /// Build everything and dump the effective configuration.
    fn build(&mut self, hooks: &[HookConfig], with_trace: bool) -> Result<NetworkManager> {
        let dataset = self
            .create_dataset()
            .map_err(|e| FlowError::creation("dataset", e))?;
        let model = self
            .create_model()
            .map_err(|e| FlowError::creation("model", e))?;

        self.config.model.restore_fallback = Some(model.restore_fallback().to_string());
        self.config.dump(&self.output_dir)?;

        let mut hooks = self
            .create_hooks(hooks)
            .map_err(|e| FlowError::creation("hooks", e))?;
        if with_trace {
            hooks.push(Box::new(TraceHook::new(&self.output_dir)));
        }

        NetworkManager::new(dataset, model, hooks, self.config.main_loop.clone())
            .map_err(|e| FlowError::creation("main loop", e))
    }

    /// Train until a hook terminates the training.
    ///
    /// `trace.json` records the number of finished epochs and the exit status.
    pub fn run(mut self) -> Result<MainLoopOutcome> {
        TrainingTrace::begin(&self.output_dir)?;
        let hooks = self.config.hooks.clone();
        let result = self
            .build(&hooks, true)
            .and_then(|mut manager| manager.run_main_loop());

        let exit_status = i32::from(result.is_err());
        if let Err(err) = TrainingTrace::finish(&self.output_dir, exit_status) {
            warn!(error = %err, "Failed to record the end of training");
        }
        match &result {
            Ok(outcome) => info!(
                epochs_done = outcome.epochs_done,
                terminated_by = ?outcome.terminated_by,
                dir = %self.output_dir.display(),
                "Training done"
            ),
            Err(err) => error!(error = %err, "Training failed"),
        }
        result
    }

    /// Evaluate the restored model on `stream` with the hooks configured for it.
    pub fn evaluate(mut self, stream: &str) -> Result<EpochData> {
        let hooks = self.config.eval_hooks(stream).to_vec();
        let mut manager = self.build(&hooks, false)?;
        manager.run_evaluation(stream)
    }
}
