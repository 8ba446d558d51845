//! Require a variable to exceed a threshold within a number of epochs.

use super::Hook;
use crate::error::HookError;
use crate::models::Model;
use crate::types::{EpochData, MEAN_AGGREGATION, MetricValue, VALID_STREAM};
use serde::{Deserialize, Serialize};

fn default_stream() -> String {
    VALID_STREAM.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckArgs {
    pub variable: String,
    pub required_min_value: f64,
    pub max_epoch: usize,
    #[serde(default = "default_stream")]
    pub stream: String,
}

/// Terminates training once `stream/variable` exceeds `required_min_value`
/// and fails the run when it did not happen by `max_epoch`.
///
/// Aggregated variables are read through their `mean`.
#[derive(Debug, Clone)]
pub struct Check {
    args: CheckArgs,
}

impl Check {
    pub fn new(args: CheckArgs) -> Self {
        Self { args }
    }
}

impl Hook for Check {
    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        let CheckArgs {
            variable,
            required_min_value,
            max_epoch,
            stream,
        } = &self.args;
        let value = match epoch_data.variable(stream, variable)? {
            MetricValue::Scalar(value) => *value,
            metric @ MetricValue::Aggregated(_) => {
                metric
                    .aggregation(MEAN_AGGREGATION)
                    .ok_or_else(|| HookError::MissingAggregation {
                        variable: variable.clone(),
                        aggregation: MEAN_AGGREGATION.into(),
                    })?
            }
            MetricValue::Array(_) => {
                return Err(HookError::UnsupportedValue {
                    variable: variable.clone(),
                    stream: stream.clone(),
                    message: "expected a scalar or an aggregation with `mean`".into(),
                });
            }
        };

        if value > *required_min_value {
            return Err(HookError::terminated(format!(
                "{stream} {variable} level matched (current {value} is greater than required {required_min_value})"
            )));
        }
        if epoch_id >= *max_epoch {
            return Err(HookError::ThresholdNotReached {
                stream: stream.clone(),
                variable: variable.clone(),
                value,
                epoch_id,
                required: *required_min_value,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::{RecordingModel, epoch_mean};
    use crate::types::StreamData;

    fn check() -> Check {
        let args: CheckArgs =
            serde_yaml::from_str("variable: accuracy\nrequired_min_value: 0.9\nmax_epoch: 3")
                .unwrap();
        assert_eq!(args.stream, "valid");
        Check::new(args)
    }

    #[test]
    fn test_terminates_when_threshold_exceeded() {
        let model = RecordingModel::default();
        let mut hook = check();
        hook.after_epoch(&model, 1, &epoch_mean("valid", "accuracy", 0.5))
            .unwrap();
        let err = hook
            .after_epoch(&model, 2, &epoch_mean("valid", "accuracy", 0.95))
            .unwrap_err();
        assert!(err.is_termination());
    }

    #[test]
    fn test_fails_after_max_epoch() {
        let model = RecordingModel::default();
        let mut hook = check();
        let err = hook
            .after_epoch(&model, 3, &epoch_mean("valid", "accuracy", 0.5))
            .unwrap_err();
        assert!(matches!(err, HookError::ThresholdNotReached { epoch_id: 3, .. }));
        assert_eq!(
            err.to_string(),
            "valid accuracy was only 0.5 in epoch 3, but 0.9 was required"
        );
    }

    #[test]
    fn test_plain_scalar_and_array() {
        let model = RecordingModel::default();
        let mut hook = check();

        let mut data = EpochData::new();
        data.insert_stream(
            "valid",
            StreamData::from([("accuracy".to_string(), MetricValue::Scalar(0.99))]),
        );
        assert!(hook.after_epoch(&model, 1, &data).unwrap_err().is_termination());

        let mut data = EpochData::new();
        data.insert_stream(
            "valid",
            StreamData::from([("accuracy".to_string(), MetricValue::Array(vec![1.0]))]),
        );
        assert!(matches!(
            hook.after_epoch(&model, 1, &data),
            Err(HookError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn test_missing_stream() {
        let model = RecordingModel::default();
        let err = check()
            .after_epoch(&model, 1, &epoch_mean("train", "accuracy", 1.0))
            .unwrap_err();
        assert!(matches!(err, HookError::MissingStream { .. }));
    }
}
