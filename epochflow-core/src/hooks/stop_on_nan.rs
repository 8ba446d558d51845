//! Stop training when a monitored value becomes NaN (or infinite).

use super::{Hook, select_variables};
use crate::error::HookError;
use crate::models::Model;
use crate::types::{BatchResult, BatchValue, EpochData};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StopOnNaNArgs {
    /// Variables to check; all of them when unset.
    pub variables: Option<Vec<String>>,
    pub stop_on_inf: bool,
    /// Check every batch result.
    pub after_batch: bool,
    /// Check the aggregated epoch data.
    pub after_epoch: bool,
}

impl Default for StopOnNaNArgs {
    fn default() -> Self {
        Self {
            variables: None,
            stop_on_inf: false,
            after_batch: false,
            after_epoch: true,
        }
    }
}

/// Terminates training when any checked number is NaN.
#[derive(Debug, Clone)]
pub struct StopOnNaN {
    args: StopOnNaNArgs,
}

impl StopOnNaN {
    pub fn new(args: StopOnNaNArgs) -> Self {
        Self { args }
    }

    fn is_bad(&self, value: f64) -> bool {
        value.is_nan() || (self.args.stop_on_inf && value.is_infinite())
    }

    fn stop(stream: &str, variable: &str) -> HookError {
        HookError::terminated(format!(
            "Variable `{variable}` of stream `{stream}` contains NaN or infinite values"
        ))
    }
}

impl Hook for StopOnNaN {
    fn after_batch(&mut self, stream_name: &str, batch: &BatchResult) -> Result<(), HookError> {
        if !self.args.after_batch {
            return Ok(());
        }
        let names: Vec<&String> = match &self.args.variables {
            Some(variables) => variables.iter().collect(),
            None => batch.keys().collect(),
        };
        for name in names {
            let value = batch.get(name).ok_or_else(|| HookError::MissingVariable {
                variable: name.clone(),
                stream: stream_name.to_string(),
                available: batch.keys().cloned().collect(),
            })?;
            let bad = match value {
                BatchValue::Scalar(value) => self.is_bad(*value),
                BatchValue::Array(values) => values.iter().any(|v| self.is_bad(*v)),
            };
            if bad {
                return Err(Self::stop(stream_name, name));
            }
        }
        Ok(())
    }

    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        _epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        if !self.args.after_epoch {
            return Ok(());
        }
        for (stream, data) in epoch_data.streams() {
            for (variable, value) in select_variables(stream, data, self.args.variables.as_deref())? {
                if value.numbers().into_iter().any(|v| self.is_bad(v)) {
                    return Err(Self::stop(stream, variable));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::RecordingModel;
    use crate::types::{MetricValue, StreamData};
    use std::collections::BTreeMap;

    fn epoch(value: MetricValue) -> EpochData {
        [
            (
                "train".to_string(),
                StreamData::from([
                    ("var".to_string(), value),
                    ("zero".to_string(), MetricValue::Scalar(0.0)),
                ]),
            ),
            (
                "valid".to_string(),
                StreamData::from([
                    ("var".to_string(), MetricValue::Scalar(0.0)),
                    ("zero".to_string(), MetricValue::Scalar(0.0)),
                ]),
            ),
        ]
        .into_iter()
        .collect()
    }

    fn hook(variables: Option<&[&str]>, stop_on_inf: bool) -> StopOnNaN {
        StopOnNaN::new(StopOnNaNArgs {
            variables: variables.map(|names| names.iter().map(|n| n.to_string()).collect()),
            stop_on_inf,
            ..Default::default()
        })
    }

    #[test]
    fn test_nan_and_inf_in_every_shape() {
        let model = RecordingModel::default();
        for bad in [f64::NAN, f64::INFINITY] {
            for value in [
                MetricValue::Scalar(bad),
                MetricValue::Array(vec![1.0, 2.0, bad]),
                MetricValue::Aggregated(BTreeMap::from([
                    ("mean".to_string(), bad),
                    ("max".to_string(), 0.0),
                ])),
            ] {
                let data = epoch(value);
                let err = hook(Some(&["var"]), true)
                    .after_epoch(&model, 1, &data)
                    .unwrap_err();
                assert!(err.is_termination());

                if !bad.is_nan() {
                    hook(Some(&["var"]), false).after_epoch(&model, 1, &data).unwrap();
                    hook(None, false).after_epoch(&model, 1, &data).unwrap();
                }
                hook(Some(&["zero"]), true).after_epoch(&model, 1, &data).unwrap();
            }
        }
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let model = RecordingModel::default();
        let err = hook(Some(&["missing"]), false)
            .after_epoch(&model, 1, &epoch(MetricValue::Scalar(8.0)))
            .unwrap_err();
        assert!(matches!(err, HookError::MissingVariable { .. }));
    }

    #[test]
    fn test_batch_checks_are_opt_in() {
        let batch = BatchResult::from([("var".to_string(), BatchValue::Scalar(f64::NAN))]);
        hook(None, false).after_batch("train", &batch).unwrap();

        let mut per_batch = StopOnNaN::new(StopOnNaNArgs {
            after_batch: true,
            after_epoch: false,
            ..Default::default()
        });
        assert!(per_batch.after_batch("train", &batch).unwrap_err().is_termination());
        per_batch
            .after_epoch(&RecordingModel::default(), 1, &epoch(MetricValue::Scalar(f64::NAN)))
            .unwrap();
    }
}
