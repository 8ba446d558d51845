//! Per-epoch timing profile collected by the network manager.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Key prefix for time spent pulling batches out of a stream.
pub const READ_BATCH: &str = "read_batch";
/// Key prefix for time spent inside `Model::run`.
pub const EVAL_BATCH: &str = "eval_batch";
/// Key prefix for time spent in `after_batch` hooks.
pub const AFTER_BATCH_HOOKS: &str = "after_batch_hooks";
/// Time spent in the `after_epoch` round.
pub const AFTER_EPOCH_HOOKS: &str = "after_epoch_hooks";

/// Durations in seconds, grouped by key such as `read_batch_train`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochProfile {
    timings: BTreeMap<String, Vec<f64>>,
}

impl EpochProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<prefix>_<stream>`, e.g. `eval_batch_valid`.
    pub fn key(prefix: &str, stream: &str) -> String {
        format!("{prefix}_{stream}")
    }

    pub fn record(&mut self, key: impl Into<String>, elapsed: Duration) {
        self.timings
            .entry(key.into())
            .or_default()
            .push(elapsed.as_secs_f64());
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.timings.get(key).map(Vec::as_slice)
    }

    /// Sum of all durations recorded under `key`, 0 when there are none.
    pub fn total(&self, key: &str) -> f64 {
        self.get(key).map(|times| times.iter().sum()).unwrap_or(0.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.timings
            .iter()
            .map(|(key, times)| (key.as_str(), times.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    pub fn clear(&mut self) {
        self.timings.clear();
    }
}
