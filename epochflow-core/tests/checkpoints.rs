//! Checkpointing hooks driven by the main loop, plus property tests.

use epochflow_core::hooks::{
    Condition, SaveBest, SaveBestArgs, SaveEvery, SaveEveryArgs, StopAfter, StopAfterArgs,
};
use epochflow_core::{
    Batch, BatchResult, BatchValue, EpochData, Hook, InMemoryDataset, MainLoopConfig,
    MetricValue, Model, ModelError, NetworkManager, StreamData,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;

type Saves = Rc<RefCell<Vec<String>>>;

/// Returns scripted losses on evaluation and records every save.
struct ScriptedModel {
    inputs: Vec<String>,
    outputs: Vec<String>,
    eval_losses: VecDeque<f64>,
    saves: Saves,
}

impl ScriptedModel {
    fn new(eval_losses: &[f64], saves: &Saves) -> Self {
        Self {
            inputs: vec!["x".into()],
            outputs: vec!["loss".into()],
            eval_losses: eval_losses.iter().copied().collect(),
            saves: Rc::clone(saves),
        }
    }
}

impl Model for ScriptedModel {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn run(&mut self, _batch: &Batch, train: bool) -> Result<BatchResult, ModelError> {
        let loss = if train {
            1.0
        } else {
            self.eval_losses.pop_front().ok_or_else(|| ModelError::Invalid {
                message: "script exhausted".into(),
            })?
        };
        Ok(BatchResult::from([("loss".to_string(), BatchValue::Scalar(loss))]))
    }

    fn save(&self, suffix: &str) -> Result<PathBuf, ModelError> {
        self.saves.borrow_mut().push(suffix.to_string());
        Ok(PathBuf::from(format!("model_{suffix}.json")))
    }

    fn restore_fallback(&self) -> &str {
        "tests.ScriptedModel"
    }
}

fn run_scripted(eval_losses: &[f64], hooks: Vec<Box<dyn Hook>>) -> Vec<String> {
    let saves = Saves::default();
    let table = Batch::from([("x".to_string(), vec![0.0])]);
    let dataset = InMemoryDataset::new()
        .with_stream("train", table.clone())
        .unwrap()
        .with_stream("valid", table)
        .unwrap();
    let config = MainLoopConfig {
        batch_size: 1,
        ..Default::default()
    };
    let mut manager = NetworkManager::new(
        Box::new(dataset),
        Box::new(ScriptedModel::new(eval_losses, &saves)),
        hooks,
        config,
    )
    .unwrap();
    manager.run_main_loop().unwrap();
    saves.take()
}

fn stop_after(epochs: usize) -> Box<dyn Hook> {
    Box::new(
        StopAfter::new(StopAfterArgs {
            epochs: Some(epochs),
            ..Default::default()
        })
        .unwrap(),
    )
}

// --- Main loop ---

#[test]
fn test_save_best_saves_on_improvement_only() {
    // Baseline 9.0, then 3, 5, 2 over three epochs.
    let saves = run_scripted(
        &[9.0, 3.0, 5.0, 2.0],
        vec![
            Box::new(SaveBest::new(SaveBestArgs::default()).unwrap()),
            stop_after(3),
        ],
    );
    assert_eq!(saves, vec!["best", "best"]);
}

#[test]
fn test_save_best_records_epochs() {
    let model = ScriptedModel::new(&[], &Saves::default());
    let mut hook = SaveBest::new(SaveBestArgs::default()).unwrap();
    let mut improved = Vec::new();
    for (epoch_id, loss) in [(1, 3.0), (2, 5.0), (3, 2.0)] {
        let before = hook.best();
        hook.after_epoch(&model, epoch_id, &valid_loss(loss)).unwrap();
        if hook.best() != before {
            improved.push(epoch_id);
        }
    }
    assert_eq!(improved, vec![1, 3]);
    assert_eq!(hook.best(), Some(2.0));
}

#[test]
fn test_save_every_with_stop_after() {
    let saves = run_scripted(
        &[1.0; 6],
        vec![
            Box::new(SaveEvery::new(SaveEveryArgs { n_epochs: 2, ..Default::default() }).unwrap()),
            stop_after(5),
        ],
    );
    assert_eq!(saves, vec!["2", "4"]);
}

fn valid_loss(loss: f64) -> EpochData {
    let stream: StreamData = [("loss".to_string(), MetricValue::mean(loss))].into();
    [("valid".to_string(), stream)].into_iter().collect()
}

// --- Properties ---

proptest! {
    #[test]
    fn prop_save_best_min_saves_on_strict_improvements(
        losses in prop::collection::vec(-100.0f64..100.0, 1..30)
    ) {
        let saves = Saves::default();
        let model = ScriptedModel::new(&[], &saves);
        let mut hook = SaveBest::new(SaveBestArgs::default()).unwrap();
        let mut expected = 0;
        let mut best = f64::INFINITY;
        for (i, loss) in losses.iter().enumerate() {
            if *loss < best {
                best = *loss;
                expected += 1;
            }
            hook.after_epoch(&model, i + 1, &valid_loss(*loss)).unwrap();
        }
        prop_assert_eq!(saves.borrow().len(), expected);
        prop_assert_eq!(hook.best(), Some(best));
    }

    #[test]
    fn prop_save_best_max_tracks_maximum(
        values in prop::collection::vec(-100.0f64..100.0, 1..30)
    ) {
        let saves = Saves::default();
        let model = ScriptedModel::new(&[], &saves);
        let mut hook = SaveBest::new(SaveBestArgs {
            condition: Condition::Max,
            ..Default::default()
        })
        .unwrap();
        for (i, value) in values.iter().enumerate() {
            hook.after_epoch(&model, i + 1, &valid_loss(*value)).unwrap();
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(hook.best(), Some(max));
    }

    #[test]
    fn prop_save_every_saves_on_multiples(n_epochs in 1usize..10, epochs in 1usize..50) {
        let saves = Saves::default();
        let model = ScriptedModel::new(&[], &saves);
        let mut hook = SaveEvery::new(SaveEveryArgs { n_epochs, ..Default::default() }).unwrap();
        for epoch_id in 1..=epochs {
            hook.after_epoch(&model, epoch_id, &EpochData::new()).unwrap();
        }
        let expected: Vec<String> = (1..=epochs)
            .filter(|epoch_id| epoch_id % n_epochs == 0)
            .map(|epoch_id| epoch_id.to_string())
            .collect();
        prop_assert_eq!(saves.take(), expected);
    }
}
