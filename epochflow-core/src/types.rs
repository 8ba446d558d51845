//! Fundamental data types flowing through the main loop: batches, batch
//! results and the aggregated per-epoch data handed to hooks.

use crate::error::{HookError, ModelError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the stream the model is trained on.
pub const TRAIN_STREAM: &str = "train";
/// Default evaluation stream.
pub const VALID_STREAM: &str = "valid";
/// Optional held-out evaluation stream.
pub const TEST_STREAM: &str = "test";

/// Name of the aggregation the manager computes for scalar outputs.
pub const MEAN_AGGREGATION: &str = "mean";

/// One batch of examples: source name to one value per example.
pub type Batch = BTreeMap<String, Vec<f64>>;

/// Number of examples in a batch, measured on its first source.
pub fn batch_size(batch: &Batch) -> usize {
    batch.values().next().map(Vec::len).unwrap_or(0)
}

/// A single output computed by the model for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchValue {
    Scalar(f64),
    Array(Vec<f64>),
}

/// Output name to value, produced once per batch.
pub type BatchResult = BTreeMap<String, BatchValue>;

/// A per-epoch metric: a plain value or a set of named aggregations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Array(Vec<f64>),
    Aggregated(BTreeMap<String, f64>),
}

impl MetricValue {
    /// Wrap a mean into the aggregation mapping hooks expect, e.g. `{"mean": 3.2}`.
    pub fn mean(value: f64) -> Self {
        Self::Aggregated(BTreeMap::from([(MEAN_AGGREGATION.to_string(), value)]))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn aggregation(&self, name: &str) -> Option<f64> {
        match self {
            Self::Aggregated(values) => values.get(name).copied(),
            _ => None,
        }
    }

    /// Every number held by this metric, whatever its shape.
    pub fn numbers(&self) -> Vec<f64> {
        match self {
            Self::Scalar(value) => vec![*value],
            Self::Array(values) => values.clone(),
            Self::Aggregated(values) => values.values().copied().collect(),
        }
    }
}

impl From<BatchValue> for MetricValue {
    fn from(value: BatchValue) -> Self {
        match value {
            BatchValue::Scalar(mean) => Self::mean(mean),
            BatchValue::Array(means) => Self::Array(means),
        }
    }
}

/// Metric name to value for a single stream.
pub type StreamData = BTreeMap<String, MetricValue>;

/// Aggregated results of one epoch, keyed by stream name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochData {
    streams: BTreeMap<String, StreamData>,
}

impl EpochData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_stream(&mut self, name: impl Into<String>, data: StreamData) {
        self.streams.insert(name.into(), data);
    }

    pub fn stream(&self, name: &str) -> Option<&StreamData> {
        self.streams.get(name)
    }

    /// Mutable access to a stream, inserting an empty one if needed.
    pub fn stream_mut(&mut self, name: &str) -> &mut StreamData {
        self.streams.entry(name.to_string()).or_default()
    }

    pub fn streams(&self) -> impl Iterator<Item = (&str, &StreamData)> {
        self.streams.iter().map(|(name, data)| (name.as_str(), data))
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Look up a variable of a stream, failing with a descriptive error.
    pub fn variable(&self, stream: &str, variable: &str) -> Result<&MetricValue, HookError> {
        let data = self.stream(stream).ok_or_else(|| HookError::MissingStream {
            stream: stream.to_string(),
            available: self.stream_names(),
        })?;
        data.get(variable)
            .ok_or_else(|| HookError::MissingVariable {
                variable: variable.to_string(),
                stream: stream.to_string(),
                available: data.keys().cloned().collect(),
            })
    }

    /// Resolve a scalar from `stream/variable`, optionally through an aggregation.
    ///
    /// With an aggregation the variable must be [`MetricValue::Aggregated`] and
    /// contain it; without one the variable must be a plain scalar.
    pub fn scalar(
        &self,
        stream: &str,
        variable: &str,
        aggregation: Option<&str>,
    ) -> Result<f64, HookError> {
        let value = self.variable(stream, variable)?;
        match aggregation {
            Some(aggregation) => match value {
                MetricValue::Aggregated(values) => {
                    values
                        .get(aggregation)
                        .copied()
                        .ok_or_else(|| HookError::MissingAggregation {
                            variable: variable.to_string(),
                            aggregation: aggregation.to_string(),
                        })
                }
                _ => Err(HookError::NotAggregated {
                    variable: variable.to_string(),
                }),
            },
            None => value.as_scalar().ok_or_else(|| HookError::NotScalar {
                variable: variable.to_string(),
            }),
        }
    }
}

impl FromIterator<(String, StreamData)> for EpochData {
    fn from_iter<I: IntoIterator<Item = (String, StreamData)>>(iter: I) -> Self {
        Self {
            streams: iter.into_iter().collect(),
        }
    }
}

/// Running sums of batch outputs, reduced to per-output means at epoch end.
#[derive(Debug, Default)]
pub struct EpochAccumulator {
    sums: BTreeMap<String, BatchValue>,
    batches: usize,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch result. Arrays are summed element-wise and must keep
    /// their length across batches.
    pub fn add(&mut self, result: &BatchResult) -> Result<(), ModelError> {
        for (name, value) in result {
            match (self.sums.get_mut(name), value) {
                (None, value) => {
                    self.sums.insert(name.clone(), value.clone());
                }
                (Some(BatchValue::Scalar(sum)), BatchValue::Scalar(value)) => *sum += value,
                (Some(BatchValue::Array(sums)), BatchValue::Array(values))
                    if sums.len() == values.len() =>
                {
                    for (sum, value) in sums.iter_mut().zip(values) {
                        *sum += value;
                    }
                }
                _ => return Err(ModelError::ShapeMismatch { name: name.clone() }),
            }
        }
        self.batches += 1;
        Ok(())
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Divide every sum by the number of accumulated batches.
    pub fn means(self) -> BTreeMap<String, BatchValue> {
        let n = self.batches as f64;
        self.sums
            .into_iter()
            .map(|(name, sum)| {
                let mean = match sum {
                    BatchValue::Scalar(sum) => BatchValue::Scalar(sum / n),
                    BatchValue::Array(sums) => {
                        BatchValue::Array(sums.into_iter().map(|s| s / n).collect())
                    }
                };
                (name, mean)
            })
            .collect()
    }

    /// Means wrapped as stream data: scalars as `{"mean": v}`, arrays element-wise.
    pub fn into_stream_data(self) -> StreamData {
        self.means()
            .into_iter()
            .map(|(name, mean)| (name, MetricValue::from(mean)))
            .collect()
    }
}
