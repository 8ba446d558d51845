//! Tracing setup: human-readable stderr output plus a per-run log file.

use anyhow::Context;
use epochflow_core::output::LOG_FILE;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, reload};

type FileLayer = Option<Box<dyn Layer<Registry> + Send + Sync>>;

/// Handle to the installed subscriber.
pub struct Logging {
    level: Level,
    file: reload::Handle<FileLayer, Registry>,
}

pub fn level(verbose: u8, quiet: bool) -> Level {
    match verbose {
        0 if quiet => Level::ERROR,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. The file layer stays empty until
/// [`Logging::attach_file`] is called.
pub fn init(verbose: u8, quiet: bool) -> Logging {
    let level = level(verbose, quiet);
    let (file_layer, file) = reload::Layer::new(FileLayer::None);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(level.as_str().to_lowercase()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Logging { level, file }
}

impl Logging {
    /// Start writing the log to `<dir>/train.log`.
    ///
    /// Records are written until the returned guard is dropped.
    pub fn attach_file(&self, dir: &Path) -> anyhow::Result<WorkerGuard> {
        let appender = tracing_appender::rolling::never(dir, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer.with_max_level(self.level))
            .boxed();
        self.file
            .reload(Some(layer))
            .context("Failed to attach the run log")?;
        Ok(guard)
    }
}
