//! Summarize the epoch time profile in the log.

use super::Hook;
use crate::error::HookError;
use crate::profile::{AFTER_BATCH_HOOKS, AFTER_EPOCH_HOOKS, EVAL_BATCH, EpochProfile, READ_BATCH};
use crate::types::TRAIN_STREAM;
use tracing::info;

/// Logs time spent reading data, running the model per stream and in hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProfile;

/// Totals in seconds derived from one epoch profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSummary {
    /// `(stream, model time)` for the train stream and every extra stream.
    pub streams: Vec<(String, f64)>,
    pub read_data: f64,
    pub hooks: f64,
}

impl LogProfile {
    pub fn summarize(profile: &EpochProfile, extra_streams: &[String]) -> ProfileSummary {
        let streams: Vec<&str> = std::iter::once(TRAIN_STREAM)
            .chain(extra_streams.iter().map(String::as_str))
            .collect();
        let mut read_data = 0.0;
        let mut hooks = profile.total(AFTER_EPOCH_HOOKS);
        for stream in &streams {
            read_data += profile.total(&EpochProfile::key(READ_BATCH, stream));
            hooks += profile.total(&EpochProfile::key(AFTER_BATCH_HOOKS, stream));
        }
        ProfileSummary {
            streams: streams
                .iter()
                .map(|stream| {
                    (
                        stream.to_string(),
                        profile.total(&EpochProfile::key(EVAL_BATCH, stream)),
                    )
                })
                .collect(),
            read_data,
            hooks,
        }
    }
}

impl Hook for LogProfile {
    fn after_epoch_profile(
        &mut self,
        epoch_id: usize,
        profile: &EpochProfile,
        extra_streams: &[String],
    ) -> Result<(), HookError> {
        let summary = Self::summarize(profile, extra_streams);
        info!("Epoch {epoch_id} profile");
        for (stream, seconds) in &summary.streams {
            info!("\tT {stream}:\t{seconds:.6}");
        }
        info!("\tT read data:\t{:.6}", summary.read_data);
        info!("\tT hooks:\t{:.6}", summary.hooks);
        Ok(())
    }
}
