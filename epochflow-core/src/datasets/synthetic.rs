//! Synthetic linear data: `y = slope * x + intercept + noise`.

use super::{Dataset, InMemoryDataset, Stream};
use crate::error::{DatasetError, Result};
use crate::registry::BuildContext;
use crate::types::{Batch, TEST_STREAM, TRAIN_STREAM, VALID_STREAM};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Keyword arguments of [`LinearSynthetic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticArgs {
    pub slope: f64,
    pub intercept: f64,
    /// Half-width of the uniform noise added to every target.
    pub noise: f64,
    pub train_size: usize,
    pub valid_size: usize,
    pub test_size: usize,
    pub seed: u64,
}

impl Default for SyntheticArgs {
    fn default() -> Self {
        Self {
            slope: 2.0,
            intercept: -1.0,
            noise: 0.1,
            train_size: 1000,
            valid_size: 200,
            test_size: 200,
            seed: 42,
        }
    }
}

/// Dataset with `x` and `y` sources for the train, valid and test streams.
#[derive(Debug, Clone)]
pub struct LinearSynthetic {
    args: SyntheticArgs,
    inner: InMemoryDataset,
}

impl LinearSynthetic {
    pub const IDENTIFIER: &'static str = "epochflow.datasets.LinearSynthetic";

    pub fn new(args: SyntheticArgs) -> std::result::Result<Self, DatasetError> {
        if !args.noise.is_finite() || args.noise < 0.0 {
            return Err(DatasetError::Invalid {
                message: format!("noise must be finite and non-negative, got {}", args.noise),
            });
        }
        let mut rng = StdRng::seed_from_u64(args.seed);
        let mut inner = InMemoryDataset::new();
        for (name, size) in [
            (TRAIN_STREAM, args.train_size),
            (VALID_STREAM, args.valid_size),
            (TEST_STREAM, args.test_size),
        ] {
            inner = inner.with_stream(name, generate(&args, size, &mut rng))?;
        }
        debug!(
            train = args.train_size,
            valid = args.valid_size,
            test = args.test_size,
            seed = args.seed,
            "Generated synthetic linear dataset"
        );
        Ok(Self { args, inner })
    }

    pub fn build(ctx: &BuildContext<'_>) -> Result<Self> {
        Ok(Self::new(ctx.parse_args()?)?)
    }

    pub fn args(&self) -> &SyntheticArgs {
        &self.args
    }
}

fn generate(args: &SyntheticArgs, size: usize, rng: &mut StdRng) -> Batch {
    let mut xs = Vec::with_capacity(size);
    let mut ys = Vec::with_capacity(size);
    for _ in 0..size {
        let x: f64 = rng.gen_range(-1.0..1.0);
        let noise = args.noise * rng.gen_range(-1.0..1.0);
        xs.push(x);
        ys.push(args.slope * x + args.intercept + noise);
    }
    Batch::from([("x".to_string(), xs), ("y".to_string(), ys)])
}

impl Dataset for LinearSynthetic {
    fn stream_names(&self) -> Vec<String> {
        self.inner.stream_names()
    }

    fn stream(&self, name: &str, batch_size: usize) -> std::result::Result<Stream, DatasetError> {
        self.inner.stream(name, batch_size)
    }
}
