//! Statistics of accumulated variables merged into the epoch data.

use super::Hook;
use super::accumulate_variables::{AccumulateVariables, AccumulateVariablesArgs};
use crate::error::{ConfigError, HookError};
use crate::types::{BatchResult, EpochData, MEAN_AGGREGATION, MetricValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Reduction of all values a variable took during an epoch.
///
/// `nan*` aggregations skip NaN values; the others propagate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Aggregation {
    Mean,
    Std,
    Min,
    Max,
    Median,
    NanMean,
    NanFraction,
    NanCount,
}

impl Aggregation {
    pub const ALL: [Aggregation; 8] = [
        Self::Mean,
        Self::Std,
        Self::Min,
        Self::Max,
        Self::Median,
        Self::NanMean,
        Self::NanFraction,
        Self::NanCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => MEAN_AGGREGATION,
            Self::Std => "std",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::NanMean => "nanmean",
            Self::NanFraction => "nanfraction",
            Self::NanCount => "nancount",
        }
    }

    /// Apply to `values`; an empty slice gives NaN, except for `nancount`.
    pub fn compute(self, values: &[f64]) -> f64 {
        let nan_count = values.iter().filter(|v| v.is_nan()).count();
        let has_nan = nan_count > 0;
        match self {
            Self::Mean => mean(values),
            Self::Std => {
                let mean = mean(values);
                mean_of(values.iter().map(|v| (v - mean).powi(2)), values.len()).sqrt()
            }
            Self::Min if has_nan => f64::NAN,
            Self::Min => values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN),
            Self::Max if has_nan => f64::NAN,
            Self::Max => values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN),
            Self::Median if has_nan => f64::NAN,
            Self::Median => median(values),
            Self::NanMean => mean_of(
                values.iter().copied().filter(|v| !v.is_nan()),
                values.len() - nan_count,
            ),
            Self::NanFraction => nan_count as f64 / values.len() as f64,
            Self::NanCount => nan_count as f64,
        }
    }
}

fn mean_of(values: impl Iterator<Item = f64>, len: usize) -> f64 {
    values.sum::<f64>() / len as f64
}

fn mean(values: &[f64]) -> f64 {
    mean_of(values.iter().copied(), values.len())
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => f64::NAN,
        len if len % 2 == 1 => sorted[mid],
        _ => (sorted[mid - 1] + sorted[mid]) / 2.0,
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Aggregation {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|aggregation| aggregation.name() == name)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "variables".into(),
                message: format!(
                    "unsupported aggregation `{name}`, expected one of {:?}",
                    Self::ALL.map(Aggregation::name)
                ),
            })
    }
}

/// One variable and the aggregations computed for it.
///
/// Written either as a bare name (`- loss`, mean only) or as a single-key
/// mapping (`- accuracy: [mean, std]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStatsEntry", into = "RawStatsEntry")]
pub struct VariableStats {
    pub variable: String,
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStatsEntry {
    Bare(String),
    Configured(BTreeMap<String, Vec<String>>),
}

impl TryFrom<RawStatsEntry> for VariableStats {
    type Error = ConfigError;

    fn try_from(raw: RawStatsEntry) -> Result<Self, Self::Error> {
        match raw {
            RawStatsEntry::Bare(variable) => Ok(Self {
                variable,
                aggregations: vec![Aggregation::Mean],
            }),
            RawStatsEntry::Configured(entry) => {
                let mut entries = entry.into_iter();
                let (Some((variable, names)), None) = (entries.next(), entries.next()) else {
                    return Err(ConfigError::InvalidValue {
                        key: "variables".into(),
                        message: "each entry must map exactly one variable to its aggregations"
                            .into(),
                    });
                };
                let aggregations = names
                    .iter()
                    .map(|name| name.parse())
                    .collect::<Result<Vec<Aggregation>, _>>()?;
                Ok(Self {
                    variable,
                    aggregations,
                })
            }
        }
    }
}

impl From<VariableStats> for RawStatsEntry {
    fn from(stats: VariableStats) -> Self {
        let names = stats
            .aggregations
            .iter()
            .map(|aggregation| aggregation.name().to_string())
            .collect();
        Self::Configured(BTreeMap::from([(stats.variable, names)]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeStatsArgs {
    pub variables: Vec<VariableStats>,
}

/// Accumulates the configured variables over every stream and stores the
/// requested aggregations as `{stream: {variable: {aggregation: value}}}`.
///
/// The statistics are merged into the epoch data before the `after_epoch`
/// round, so every hook sees them. Other aggregations of the variable are
/// kept; one with the same name (such as the main loop's `mean`) is replaced.
#[derive(Debug, Clone)]
pub struct ComputeStats {
    variables: BTreeMap<String, Vec<Aggregation>>,
    accumulator: AccumulateVariables,
}

impl ComputeStats {
    pub fn new(args: ComputeStatsArgs) -> Result<Self, ConfigError> {
        let mut variables: BTreeMap<String, Vec<Aggregation>> = BTreeMap::new();
        for entry in args.variables {
            if entry.aggregations.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "variables".into(),
                    message: format!("no aggregations given for `{}`", entry.variable),
                });
            }
            let aggregations = variables.entry(entry.variable).or_default();
            for aggregation in entry.aggregations {
                if !aggregations.contains(&aggregation) {
                    aggregations.push(aggregation);
                }
            }
        }
        let accumulator = AccumulateVariables::new(AccumulateVariablesArgs {
            variables: variables.keys().cloned().collect(),
        });
        Ok(Self {
            variables,
            accumulator,
        })
    }
}

impl Hook for ComputeStats {
    fn after_batch(&mut self, stream_name: &str, batch: &BatchResult) -> Result<(), HookError> {
        self.accumulator.after_batch(stream_name, batch)
    }

    fn extend_epoch_data(
        &mut self,
        _epoch_id: usize,
        epoch_data: &mut EpochData,
    ) -> Result<(), HookError> {
        for (stream, variables) in self.accumulator.take() {
            let data = epoch_data.stream_mut(&stream);
            for (variable, values) in variables {
                let Some(aggregations) = self.variables.get(&variable) else {
                    continue;
                };
                let mut stats = match data.remove(&variable) {
                    Some(MetricValue::Aggregated(existing)) => existing,
                    _ => BTreeMap::new(),
                };
                for aggregation in aggregations {
                    stats.insert(aggregation.name().to_string(), aggregation.compute(&values));
                }
                debug!(stream = %stream, variable = %variable, values = values.len(), "Statistics computed");
                data.insert(variable, MetricValue::Aggregated(stats));
            }
        }
        Ok(())
    }
}
