//! Lifecycle hooks invoked by the network manager.
//!
//! A hook observes training through a fixed sequence of callbacks:
//!
//! ```text
//! before_training
//!   after_batch*                      (baseline evaluation, epoch 0)
//!   extend_epoch_data
//! before_first_epoch
//! { after_batch* extend_epoch_data after_epoch after_epoch_profile }*
//! after_training
//! ```
//!
//! `extend_epoch_data` is the only stage that may modify the epoch data; it
//! runs on every hook before any of them sees the data. Every callback has a
//! no-op default. Returning
//! [`HookError::TrainingTerminated`] from `after_epoch` ends the main loop once
//! the current round of hooks is over; any other error aborts the run.

pub mod accumulate_variables;
pub mod check;
pub mod compute_stats;
pub mod log_profile;
pub mod log_variables;
pub mod save;
pub mod stop_after;
pub mod stop_on_nan;
pub mod stop_on_plateau;
pub mod write_csv;

pub use accumulate_variables::{Accumulated, AccumulateVariables, AccumulateVariablesArgs};
pub use check::{Check, CheckArgs};
pub use compute_stats::{Aggregation, ComputeStats, ComputeStatsArgs, VariableStats};
pub use log_profile::LogProfile;
pub use log_variables::{LogVariables, LogVariablesArgs, OnUnknownType};
pub use save::{
    Condition, OnSaveFailure, SaveBest, SaveBestArgs, SaveEvery, SaveEveryArgs, SaveLatest,
    SaveLatestArgs, save_model,
};
pub use stop_after::{StopAfter, StopAfterArgs};
pub use stop_on_nan::{StopOnNaN, StopOnNaNArgs};
pub use stop_on_plateau::{StopOnPlateau, StopOnPlateauArgs};
pub use write_csv::{OnMissingVariable, OnUnknownValue, WriteCsv, WriteCsvArgs};

use crate::error::HookError;
use crate::models::Model;
use crate::profile::EpochProfile;
use crate::types::{BatchResult, EpochData, MetricValue, StreamData};

/// Observer of the training lifecycle.
#[allow(unused_variables)]
pub trait Hook {
    /// Short name used in log messages.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    fn before_training(&mut self, model: &dyn Model) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once with the baseline evaluation of the extra streams.
    fn before_first_epoch(
        &mut self,
        model: &dyn Model,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn after_batch(&mut self, stream_name: &str, batch: &BatchResult) -> Result<(), HookError> {
        Ok(())
    }

    /// Add to the epoch data before the `after_epoch` round; `epoch_id` is 0
    /// for the baseline and for evaluation runs.
    fn extend_epoch_data(
        &mut self,
        epoch_id: usize,
        epoch_data: &mut EpochData,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn after_epoch(
        &mut self,
        model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn after_epoch_profile(
        &mut self,
        epoch_id: usize,
        profile: &EpochProfile,
        extra_streams: &[String],
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn after_training(&mut self, model: &dyn Model) -> Result<(), HookError> {
        Ok(())
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

/// Variables of a stream to act on: all of them, or the listed ones.
///
/// A listed variable missing from the stream is an error.
pub(crate) fn select_variables<'a>(
    stream: &str,
    data: &'a StreamData,
    variables: Option<&'a [String]>,
) -> Result<Vec<(&'a str, &'a MetricValue)>, HookError> {
    match variables {
        None => Ok(data
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                data.get(name)
                    .map(|value| (name.as_str(), value))
                    .ok_or_else(|| HookError::MissingVariable {
                        variable: name.clone(),
                        stream: stream.to_string(),
                        available: data.keys().cloned().collect(),
                    })
            })
            .collect(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricValue;

    struct Silent;
    impl Hook for Silent {}

    #[test]
    fn test_default_name_is_type_name() {
        assert_eq!(Silent.name(), "Silent");
        assert_eq!(LogProfile.name(), "LogProfile");
    }

    #[test]
    fn test_default_callbacks_are_noops() {
        let model = testing::RecordingModel::default();
        let mut hook = Silent;
        let data = EpochData::new();
        hook.before_training(&model).unwrap();
        hook.before_first_epoch(&model, &data).unwrap();
        hook.after_batch("train", &BatchResult::new()).unwrap();
        let mut extended = EpochData::new();
        hook.extend_epoch_data(1, &mut extended).unwrap();
        assert_eq!(extended, data);
        hook.after_epoch(&model, 1, &data).unwrap();
        hook.after_epoch_profile(1, &EpochProfile::new(), &[])
            .unwrap();
        hook.after_training(&model).unwrap();
    }

    #[test]
    fn test_select_variables() {
        let data = StreamData::from([
            ("loss".to_string(), MetricValue::mean(1.0)),
            ("mae".to_string(), MetricValue::Scalar(0.5)),
        ]);
        assert_eq!(select_variables("valid", &data, None).unwrap().len(), 2);

        let names = vec!["mae".to_string()];
        let selected = select_variables("valid", &data, Some(names.as_slice())).unwrap();
        assert_eq!(selected, vec![("mae", &MetricValue::Scalar(0.5))]);

        let names = vec!["accuracy".to_string()];
        assert!(matches!(
            select_variables("valid", &data, Some(names.as_slice())),
            Err(HookError::MissingVariable { variable, .. }) if variable == "accuracy"
        ));
    }
}
