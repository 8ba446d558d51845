//! Collect per-batch values of selected variables over an epoch.

use super::Hook;
use crate::error::HookError;
use crate::models::Model;
use crate::types::{BatchResult, BatchValue, EpochData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccumulateVariablesArgs {
    pub variables: Vec<String>,
}

/// Values collected so far, keyed by stream and then variable.
pub type Accumulated = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Gathers every value of the selected variables, stream by stream.
///
/// Arrays contribute all their elements and scalars a single value. The
/// collected values are dropped at the start of training and after each epoch.
#[derive(Debug, Clone, Default)]
pub struct AccumulateVariables {
    variables: Vec<String>,
    accumulated: Accumulated,
}

impl AccumulateVariables {
    pub fn new(args: AccumulateVariablesArgs) -> Self {
        Self {
            variables: args.variables,
            accumulated: Accumulated::new(),
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn accumulated(&self) -> &Accumulated {
        &self.accumulated
    }

    pub fn values(&self, stream: &str, variable: &str) -> Option<&[f64]> {
        self.accumulated
            .get(stream)
            .and_then(|variables| variables.get(variable))
            .map(Vec::as_slice)
    }

    /// Hand out the collected values and start over.
    pub fn take(&mut self) -> Accumulated {
        std::mem::take(&mut self.accumulated)
    }

    pub fn reset(&mut self) {
        self.accumulated.clear();
    }
}

impl Hook for AccumulateVariables {
    fn after_batch(&mut self, stream_name: &str, batch: &BatchResult) -> Result<(), HookError> {
        let stream = self.accumulated.entry(stream_name.to_string()).or_default();
        for variable in &self.variables {
            let value = batch.get(variable).ok_or_else(|| HookError::MissingVariable {
                variable: variable.clone(),
                stream: stream_name.to_string(),
                available: batch.keys().cloned().collect(),
            })?;
            let values = stream.entry(variable.clone()).or_default();
            match value {
                BatchValue::Scalar(value) => values.push(*value),
                BatchValue::Array(array) => values.extend_from_slice(array),
            }
        }
        Ok(())
    }

    fn before_first_epoch(
        &mut self,
        _model: &dyn Model,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        self.reset();
        Ok(())
    }

    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        _epoch_id: usize,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        self.reset();
        Ok(())
    }
}
