//! Stop training once the monitored variable stops improving.

use super::Hook;
use super::save::Condition;
use crate::error::{ConfigError, HookError};
use crate::models::Model;
use crate::types::{EpochData, MEAN_AGGREGATION, VALID_STREAM};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StopOnPlateauArgs {
    pub variable: String,
    pub stream: String,
    pub aggregation: Option<String>,
    pub short_term: usize,
    pub long_term: usize,
    pub objective: Condition,
}

impl Default for StopOnPlateauArgs {
    fn default() -> Self {
        Self {
            variable: "loss".into(),
            stream: VALID_STREAM.into(),
            aggregation: Some(MEAN_AGGREGATION.into()),
            short_term: 5,
            long_term: 20,
            objective: Condition::Min,
        }
    }
}

/// Compares the short-term and the long-term mean of the monitored value.
///
/// Once `long_term` epochs were observed, training terminates when the
/// short-term mean is worse than the long-term one.
#[derive(Debug, Clone)]
pub struct StopOnPlateau {
    args: StopOnPlateauArgs,
    history: VecDeque<f64>,
}

impl StopOnPlateau {
    pub fn new(args: StopOnPlateauArgs) -> Result<Self, ConfigError> {
        if args.short_term == 0 || args.short_term >= args.long_term {
            return Err(ConfigError::InvalidValue {
                key: "short_term".into(),
                message: format!(
                    "must be positive and smaller than long_term ({}), got {}",
                    args.long_term, args.short_term
                ),
            });
        }
        let history = VecDeque::with_capacity(args.long_term);
        Ok(Self { args, history })
    }

    fn mean_of_last(&self, n: usize) -> f64 {
        self.history.iter().rev().take(n).sum::<f64>() / n as f64
    }
}

impl Hook for StopOnPlateau {
    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        let value = epoch_data.scalar(
            &self.args.stream,
            &self.args.variable,
            self.args.aggregation.as_deref(),
        )?;
        if self.history.len() == self.args.long_term {
            self.history.pop_front();
        }
        self.history.push_back(value);
        if self.history.len() < self.args.long_term {
            return Ok(());
        }

        let short = self.mean_of_last(self.args.short_term);
        let long = self.mean_of_last(self.args.long_term);
        debug!(epoch_id, short, long, "Plateau check");
        // A short-term mean better than the long-term one means we still improve.
        let plateau = match self.args.objective {
            Condition::Min => short > long,
            Condition::Max => short < long,
        };
        if plateau {
            return Err(HookError::terminated(format!(
                "{} {} reached a plateau in epoch {epoch_id} (short-term mean {short}, long-term mean {long})",
                self.args.stream, self.args.variable
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::{RecordingModel, epoch_mean};

    fn run(hook: &mut StopOnPlateau, stream: &str, variable: &str, values: &[f64]) -> Vec<bool> {
        let model = RecordingModel::default();
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                match hook.after_epoch(&model, i + 1, &epoch_mean(stream, variable, *value)) {
                    Ok(()) => false,
                    Err(err) => {
                        assert!(err.is_termination(), "unexpected error {err}");
                        true
                    }
                }
            })
            .collect()
    }

    #[test]
    fn test_short_term_must_be_smaller() {
        let args = StopOnPlateauArgs {
            short_term: 500,
            long_term: 100,
            ..Default::default()
        };
        assert!(StopOnPlateau::new(args).is_err());
    }

    #[test]
    fn test_min_objective() {
        let mut hook = StopOnPlateau::new(StopOnPlateauArgs {
            short_term: 3,
            long_term: 6,
            stream: "test".into(),
            ..Default::default()
        })
        .unwrap();
        let stopped = run(&mut hook, "test", "loss", &[4.0, 3.0, 2.0, 2.0, 3.0, 10.0]);
        assert_eq!(stopped, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn test_max_objective() {
        let mut hook = StopOnPlateau::new(StopOnPlateauArgs {
            short_term: 3,
            long_term: 6,
            variable: "accuracy".into(),
            objective: Condition::Max,
            ..Default::default()
        })
        .unwrap();
        let stopped = run(&mut hook, "valid", "accuracy", &[1.0, 5.0, 20.0, 2.0, 2.0, 2.0]);
        assert_eq!(stopped.last(), Some(&true));
        assert!(stopped[..5].iter().all(|s| !s));
    }

    #[test]
    fn test_improving_does_not_stop() {
        let mut hook = StopOnPlateau::new(StopOnPlateauArgs {
            short_term: 2,
            long_term: 4,
            ..Default::default()
        })
        .unwrap();
        let values: Vec<f64> = (0..10).map(|i| 10.0 - i as f64).collect();
        assert!(run(&mut hook, "valid", "loss", &values).iter().all(|s| !s));
    }
}
