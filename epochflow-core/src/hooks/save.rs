//! Checkpointing hooks: every N epochs, on improvement, and after every epoch.

use super::Hook;
use crate::error::{ConfigError, HookError};
use crate::models::Model;
use crate::types::{EpochData, MEAN_AGGREGATION, VALID_STREAM};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What to do when the model fails to save itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnSaveFailure {
    #[default]
    Error,
    Warn,
    Ignore,
}

/// Save `model` with the given name suffix, handling failure per `on_failure`.
pub fn save_model(
    model: &dyn Model,
    suffix: &str,
    on_failure: OnSaveFailure,
) -> Result<(), HookError> {
    match model.save(suffix) {
        Ok(path) => {
            debug!(path = %path.display(), "Model saved");
            Ok(())
        }
        Err(err) => match on_failure {
            OnSaveFailure::Error => Err(HookError::SaveFailed(err)),
            OnSaveFailure::Warn => {
                warn!(suffix, error = %err, "Failed to save the model");
                Ok(())
            }
            OnSaveFailure::Ignore => {
                debug!(suffix, error = %err, "Failed to save the model, ignoring");
                Ok(())
            }
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveEveryArgs {
    pub n_epochs: usize,
    pub on_failure: OnSaveFailure,
}

impl Default for SaveEveryArgs {
    fn default() -> Self {
        Self {
            n_epochs: 1,
            on_failure: OnSaveFailure::Error,
        }
    }
}

/// Saves the model after every `n_epochs`-th epoch, named by the epoch id.
#[derive(Debug, Clone)]
pub struct SaveEvery {
    n_epochs: usize,
    on_failure: OnSaveFailure,
}

impl SaveEvery {
    pub fn new(args: SaveEveryArgs) -> Result<Self, ConfigError> {
        if args.n_epochs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "n_epochs".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(Self {
            n_epochs: args.n_epochs,
            on_failure: args.on_failure,
        })
    }
}

impl Hook for SaveEvery {
    fn after_epoch(
        &mut self,
        model: &dyn Model,
        epoch_id: usize,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        if epoch_id % self.n_epochs == 0 {
            save_model(model, &epoch_id.to_string(), self.on_failure)?;
        }
        Ok(())
    }
}

/// Direction in which the monitored value improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[default]
    Min,
    Max,
}

impl Condition {
    /// Whether `new` is strictly better than `best`.
    pub fn is_better(self, new: f64, best: f64) -> bool {
        match self {
            Self::Min => new < best,
            Self::Max => new > best,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveBestArgs {
    pub variable: String,
    pub condition: Condition,
    pub stream: String,
    /// Aggregation to read from the variable; `null` for plain scalars.
    pub aggregation: Option<String>,
    pub model_name: String,
    pub on_save_failure: OnSaveFailure,
}

impl Default for SaveBestArgs {
    fn default() -> Self {
        Self {
            variable: "loss".into(),
            condition: Condition::Min,
            stream: VALID_STREAM.into(),
            aggregation: Some(MEAN_AGGREGATION.into()),
            model_name: "best".into(),
            on_save_failure: OnSaveFailure::Error,
        }
    }
}

/// Saves the model whenever the monitored variable improves.
///
/// The first observed value always counts as an improvement.
#[derive(Debug, Clone)]
pub struct SaveBest {
    args: SaveBestArgs,
    best: Option<f64>,
}

impl SaveBest {
    pub fn new(args: SaveBestArgs) -> Result<Self, ConfigError> {
        if args.model_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "model_name".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(Self { args, best: None })
    }

    /// Best value seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    fn is_better(&self, value: f64) -> bool {
        match self.best {
            None => true,
            Some(best) => self.args.condition.is_better(value, best),
        }
    }
}

impl Hook for SaveBest {
    fn after_epoch(
        &mut self,
        model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        let value = epoch_data.scalar(
            &self.args.stream,
            &self.args.variable,
            self.args.aggregation.as_deref(),
        )?;
        if self.is_better(value) {
            info!(
                epoch_id,
                stream = %self.args.stream,
                variable = %self.args.variable,
                value,
                "New best value, saving the model"
            );
            self.best = Some(value);
            save_model(model, &self.args.model_name, self.args.on_save_failure)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveLatestArgs {
    pub on_save_failure: OnSaveFailure,
}

/// Saves the model after every epoch under the `latest` suffix.
#[derive(Debug, Clone)]
pub struct SaveLatest {
    on_save_failure: OnSaveFailure,
}

impl SaveLatest {
    pub const SUFFIX: &'static str = "latest";

    pub fn new(args: SaveLatestArgs) -> Self {
        Self {
            on_save_failure: args.on_save_failure,
        }
    }
}

impl Hook for SaveLatest {
    fn after_epoch(
        &mut self,
        model: &dyn Model,
        _epoch_id: usize,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        save_model(model, Self::SUFFIX, self.on_save_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::hooks::testing::{RecordingModel, epoch_mean};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Capture everything logged at `debug` and above while running `f`.
    fn capture_logs<F: FnOnce()>(f: F) -> String {
        #[derive(Clone, Default)]
        struct Buffer(Arc<Mutex<Vec<u8>>>);

        impl Write for Buffer {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_save_every_n_epochs() {
        let model = RecordingModel::default();
        let mut hook = SaveEvery::new(SaveEveryArgs {
            n_epochs: 3,
            ..Default::default()
        })
        .unwrap();
        for epoch_id in 1..=7 {
            hook.after_epoch(&model, epoch_id, &EpochData::new()).unwrap();
        }
        assert_eq!(model.saved(), vec!["3", "6"]);
    }

    #[test]
    fn test_save_every_rejects_zero() {
        assert!(matches!(
            SaveEvery::new(SaveEveryArgs {
                n_epochs: 0,
                ..Default::default()
            }),
            Err(ConfigError::InvalidValue { key, .. }) if key == "n_epochs"
        ));
    }

    #[test]
    fn test_save_failure_error() {
        let model = RecordingModel::failing();
        let err = save_model(&model, "best", OnSaveFailure::Error).unwrap_err();
        assert!(matches!(err, HookError::SaveFailed(ModelError::Save { .. })));
    }

    #[test]
    fn test_save_failure_warn_logs_warning() {
        let model = RecordingModel::failing();
        let logs = capture_logs(|| {
            save_model(&model, "best", OnSaveFailure::Warn).unwrap();
        });
        assert!(logs.contains("WARN"), "logs: {logs}");
        assert!(logs.contains("Failed to save the model"));
    }

    #[test]
    fn test_save_failure_ignore_is_silent() {
        let model = RecordingModel::failing();
        let logs = capture_logs(|| {
            save_model(&model, "best", OnSaveFailure::Ignore).unwrap();
        });
        assert!(!logs.contains("WARN"), "logs: {logs}");
        assert!(!logs.contains("ERROR"), "logs: {logs}");
    }

    #[test]
    fn test_save_best_min_saves_on_improvement_only() {
        let model = RecordingModel::default();
        let mut hook = SaveBest::new(SaveBestArgs::default()).unwrap();
        let mut saved_on = Vec::new();
        for (epoch_id, loss) in [(1, 3.0), (2, 5.0), (3, 2.0)] {
            let before = model.saved().len();
            hook.after_epoch(&model, epoch_id, &epoch_mean("valid", "loss", loss))
                .unwrap();
            if model.saved().len() > before {
                saved_on.push(epoch_id);
            }
        }
        assert_eq!(saved_on, vec![1, 3]);
        assert_eq!(model.saved(), vec!["best", "best"]);
        assert_eq!(hook.best(), Some(2.0));
    }

    #[test]
    fn test_save_best_max_with_equal_values() {
        let model = RecordingModel::default();
        let mut hook = SaveBest::new(SaveBestArgs {
            variable: "accuracy".into(),
            condition: Condition::Max,
            model_name: "top".into(),
            ..Default::default()
        })
        .unwrap();
        for (epoch_id, value) in [(1, 0.5), (2, 0.5), (3, 0.7)] {
            hook.after_epoch(&model, epoch_id, &epoch_mean("valid", "accuracy", value))
                .unwrap();
        }
        assert_eq!(model.saved(), vec!["top", "top"]);
    }

    #[test]
    fn test_save_best_updates_best_when_save_fails() {
        let model = RecordingModel::failing();
        let mut hook = SaveBest::new(SaveBestArgs {
            on_save_failure: OnSaveFailure::Ignore,
            ..Default::default()
        })
        .unwrap();
        hook.after_epoch(&model, 1, &epoch_mean("valid", "loss", 1.0))
            .unwrap();
        assert_eq!(hook.best(), Some(1.0));
    }

    #[test]
    fn test_save_best_missing_stream() {
        let model = RecordingModel::default();
        let mut hook = SaveBest::new(SaveBestArgs::default()).unwrap();
        let err = hook
            .after_epoch(&model, 1, &epoch_mean("train", "loss", 1.0))
            .unwrap_err();
        assert!(matches!(err, HookError::MissingStream { .. }));
    }

    #[test]
    fn test_save_latest() {
        let model = RecordingModel::default();
        let mut hook = SaveLatest::new(SaveLatestArgs::default());
        hook.after_epoch(&model, 1, &EpochData::new()).unwrap();
        hook.after_epoch(&model, 2, &EpochData::new()).unwrap();
        assert_eq!(model.saved(), vec!["latest", "latest"]);
    }

    #[test]
    fn test_args_from_yaml() {
        let args: SaveBestArgs =
            serde_yaml::from_str("condition: max\naggregation: null\non_save_failure: warn")
                .unwrap();
        assert_eq!(args.condition, Condition::Max);
        assert_eq!(args.aggregation, None);
        assert_eq!(args.on_save_failure, OnSaveFailure::Warn);
        assert_eq!(args.variable, "loss");

        assert!(serde_yaml::from_str::<SaveEveryArgs>("every: 2").is_err());
    }
}
