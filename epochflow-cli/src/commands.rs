//! CLI subcommand handlers.

use crate::Commands;
use crate::logging::Logging;
use anyhow::Context;
use epochflow_core::output::CONFIG_FILE;
use epochflow_core::{RunConfig, Training, create_output_dir, prune_train_dirs};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Marks an error whose chain was already logged to the run log.
#[derive(Debug)]
pub struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Run failed")
    }
}

/// Log the error chain now, while the run log writer is still attached.
fn report<T>(result: anyhow::Result<T>) -> anyhow::Result<T> {
    result.map_err(|err| {
        error!("{err:#}");
        err.context(Reported)
    })
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, logging: &Logging) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            config,
            overrides,
            output_root,
        } => train(&config, &overrides, &output_root, None, logging),
        Commands::Resume {
            config,
            restore_from,
            overrides,
            output_root,
        } => {
            let config = find_config(&config);
            let restore_from = restore_from.or_else(|| config.parent().map(Path::to_path_buf));
            train(&config, &overrides, &output_root, restore_from, logging)
        }
        Commands::Eval {
            stream,
            model_path,
            config,
            overrides,
            output_root,
        } => {
            let config = config.unwrap_or_else(|| config_next_to(&model_path));
            eval(&stream, &model_path, &config, &overrides, &output_root, logging)
        }
        Commands::Prune {
            dir,
            epochs,
            subdirs,
        } => prune(&dir, epochs, subdirs),
    }
}

/// A run directory stands for the `config.yaml` inside it.
fn find_config(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(CONFIG_FILE)
    } else {
        path.to_path_buf()
    }
}

/// The configuration dumped next to a checkpoint, or inside a run directory.
fn config_next_to(model_path: &Path) -> PathBuf {
    if model_path.is_dir() {
        model_path.join(CONFIG_FILE)
    } else {
        model_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(CONFIG_FILE)
    }
}

fn load_config(path: &Path, overrides: &[String]) -> anyhow::Result<RunConfig> {
    RunConfig::load(path, overrides)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn train(
    config_path: &Path,
    overrides: &[String],
    output_root: &Path,
    restore_from: Option<PathBuf>,
    logging: &Logging,
) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let output_dir = create_output_dir(output_root, config.model.name.as_deref())
        .with_context(|| format!("Failed to create a run directory in {}", output_root.display()))?;
    let _guard = logging.attach_file(&output_dir)?;
    info!(
        config = %config_path.display(),
        restore_from = ?restore_from,
        "Starting training"
    );

    let outcome = report(
        Training::new(config, &output_dir)
            .with_restore_from(restore_from)
            .run()
            .context("Training failed"),
    )?;
    println!(
        "Finished {} epochs in {}",
        outcome.epochs_done,
        output_dir.display()
    );
    Ok(())
}

fn eval(
    stream: &str,
    model_path: &Path,
    config_path: &Path,
    overrides: &[String],
    output_root: &Path,
    logging: &Logging,
) -> anyhow::Result<()> {
    let config = load_config(config_path, overrides)?;
    let output_dir = create_output_dir(output_root, config.model.name.as_deref())
        .with_context(|| format!("Failed to create a run directory in {}", output_root.display()))?;
    let _guard = logging.attach_file(&output_dir)?;
    info!(stream, model = %model_path.display(), "Starting evaluation");

    let epoch_data = report(
        Training::new(config, &output_dir)
            .with_restore_from(Some(model_path.to_path_buf()))
            .evaluate(stream)
            .with_context(|| format!("Evaluating stream `{stream}` failed")),
    )?;
    print!(
        "{}",
        report(serde_yaml::to_string(&epoch_data).context("Failed to print the results"))?
    );
    Ok(())
}

fn prune(dir: &Path, epochs: usize, subdirs: bool) -> anyhow::Result<()> {
    let report = prune_train_dirs(dir, epochs, subdirs)
        .with_context(|| format!("Failed to prune {}", dir.display()))?;
    for path in report.removed_train_dirs.iter().chain(&report.removed_subdirs) {
        println!("Removed {}", path.display());
    }
    info!(
        train_dirs = report.removed_train_dirs.len(),
        subdirs = report.removed_subdirs.len(),
        "Pruning done"
    );
    Ok(())
}
