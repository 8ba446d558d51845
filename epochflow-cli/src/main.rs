//! Epochflow CLI: train, resume, evaluate and prune training runs.

mod commands;
mod logging;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Epochflow: configurable training main loop
#[derive(Parser, Debug)]
#[command(name = "epochflow", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train a model from a configuration file
    Train {
        /// Path to the YAML configuration
        config: PathBuf,
        /// Configuration overrides as dotted.key=value
        overrides: Vec<String>,
        /// Directory under which the run directory is created
        #[arg(short, long, default_value = "./log")]
        output_root: PathBuf,
    },
    /// Continue training from a previous run
    Resume {
        /// Configuration file or run directory
        config: PathBuf,
        /// Checkpoint or run directory to restore from (default: the config's directory)
        #[arg(short, long)]
        restore_from: Option<PathBuf>,
        /// Configuration overrides as dotted.key=value
        overrides: Vec<String>,
        #[arg(short, long, default_value = "./log")]
        output_root: PathBuf,
    },
    /// Evaluate a trained model on one stream
    Eval {
        /// Stream to evaluate, e.g. valid or test
        stream: String,
        /// Checkpoint or run directory of the model
        model_path: PathBuf,
        /// Configuration file (default: the one next to the model)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Configuration overrides as dotted.key=value
        overrides: Vec<String>,
        #[arg(short, long, default_value = "./log")]
        output_root: PathBuf,
    },
    /// Delete unfinished train dirs
    Prune {
        /// Directory holding the train dirs
        dir: PathBuf,
        /// Minimum number of finished epochs to keep a train dir
        #[arg(short, long, default_value_t = 1)]
        epochs: usize,
        /// Also delete subdirectories of the kept train dirs
        #[arg(short, long)]
        subdirs: bool,
    },
}

fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let logging = logging::init(cli.verbose, cli.quiet);

    match commands::handle_command(cli.command, &logging) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.downcast_ref::<commands::Reported>().is_some() => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("epochflow").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_train_with_overrides() {
        let cli = parse(&["-vv", "train", "run.yaml", "main_loop.batch_size=8", "-o", "out"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Train {
                config,
                overrides,
                output_root,
            } => {
                assert_eq!(config, PathBuf::from("run.yaml"));
                assert_eq!(overrides, vec!["main_loop.batch_size=8"]);
                assert_eq!(output_root, PathBuf::from("out"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_prune_defaults() {
        match parse(&["prune", "log"]).command {
            Commands::Prune {
                dir,
                epochs,
                subdirs,
            } => {
                assert_eq!(dir, PathBuf::from("log"));
                assert_eq!(epochs, 1);
                assert!(!subdirs);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_eval_arguments() {
        let cli = parse(&["-q", "eval", "test", "log/run", "-c", "other.yaml"]);
        assert!(cli.quiet);
        match cli.command {
            Commands::Eval {
                stream,
                model_path,
                config,
                ..
            } => {
                assert_eq!(stream, "test");
                assert_eq!(model_path, PathBuf::from("log/run"));
                assert_eq!(config, Some(PathBuf::from("other.yaml")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["epochflow"]).is_err());
    }
}
