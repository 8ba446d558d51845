//! Log the epoch data after every epoch.

use super::{Hook, select_variables};
use crate::error::HookError;
use crate::models::Model;
use crate::types::{EpochData, MetricValue};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What to do with values that can not be logged as numbers (arrays).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnknownType {
    #[default]
    Ignore,
    Warn,
    Error,
    /// Log the value's textual form.
    Str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogVariablesArgs {
    pub variables: Option<Vec<String>>,
    pub on_unknown_type: OnUnknownType,
}

/// Logs the selected variables of every stream with `info!`.
///
/// Aggregations with a single entry go on one line, otherwise one line per
/// aggregation.
#[derive(Debug, Clone)]
pub struct LogVariables {
    args: LogVariablesArgs,
}

impl LogVariables {
    pub fn new(args: LogVariablesArgs) -> Self {
        Self { args }
    }

    fn lines(&self, epoch_data: &EpochData) -> Result<Vec<String>, HookError> {
        let mut lines = Vec::new();
        for (stream, data) in epoch_data.streams() {
            for (variable, value) in select_variables(stream, data, self.args.variables.as_deref())? {
                match value {
                    MetricValue::Scalar(value) => {
                        lines.push(format!("\t{stream} {variable}: {value:.6}"));
                    }
                    MetricValue::Aggregated(aggregations) if aggregations.len() == 1 => {
                        for (name, value) in aggregations {
                            lines.push(format!("\t{stream} {variable} {name}: {value:.6}"));
                        }
                    }
                    MetricValue::Aggregated(aggregations) => {
                        lines.push(format!("\t{stream} {variable}:"));
                        for (name, value) in aggregations {
                            lines.push(format!("\t\t{name}: {value:.6}"));
                        }
                    }
                    MetricValue::Array(values) => match self.args.on_unknown_type {
                        OnUnknownType::Ignore => {}
                        OnUnknownType::Warn => {
                            warn!(stream, variable, "Variable is an array and can not be logged");
                        }
                        OnUnknownType::Error => {
                            return Err(HookError::UnsupportedValue {
                                variable: variable.to_string(),
                                stream: stream.to_string(),
                                message: "arrays can not be logged".into(),
                            });
                        }
                        OnUnknownType::Str => {
                            lines.push(format!("\t{stream} {variable}: {values:?}"));
                        }
                    },
                }
            }
        }
        Ok(lines)
    }
}

impl Hook for LogVariables {
    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        let lines = self.lines(epoch_data)?;
        info!("After epoch {epoch_id}");
        for line in lines {
            info!("{line}");
        }
        Ok(())
    }
}
