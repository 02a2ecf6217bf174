// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Observability crate for logging.

use std::{
    io::{IsTerminal, Write},
    path::Path,
};

use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt::time::UtcTime, prelude::*};

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable text.
    #[default]
    Text,
    /// One Bunyan JSON object per line.
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Setup logging using the tracing library.
///
/// # Arguments
///
/// * `app_name`: Name of the application. Names the log file and the Bunyan `name` field.
/// * `log_dir`: If provided, logs are written to `<app_name>.log` in this directory.
/// * `log_to_stderr`: If true, logs will additionally be printed to stderr.
/// * `format`: Output format of all writers.
///
/// The returned guards flush pending log lines when dropped and must be kept
/// alive for as long as logs should be written.
pub fn setup_tracing<P: AsRef<Path>>(
    app_name: &str,
    log_dir: Option<P>,
    log_to_stderr: bool,
    format: LogFormat,
) -> Result<Vec<WorkerGuard>, SetGlobalDefaultError> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers: Vec<BoxedLayer> = vec![];
    if format == LogFormat::Json {
        layers.push(JsonStorageLayer.boxed());
    }

    if let Some(log_dir) = log_dir {
        let log_file =
            tracing_appender::rolling::never(log_dir.as_ref(), format!("{app_name}.log"));
        let (layer, guard) = writer_layer(app_name, log_file, format, false);
        layers.push(
            layer
                .with_filter(tracing::level_filters::LevelFilter::DEBUG)
                .boxed(),
        );
        guards.push(guard);
    }

    if log_to_stderr {
        // Enable colors if the stderr is a terminal.
        let ansi = std::io::stderr().is_terminal();
        let (layer, guard) = writer_layer(app_name, std::io::stderr(), format, ansi);
        layers.push(layer.with_filter(log_level).boxed());
        guards.push(guard);
    }

    // global subscriber
    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("Logging initialized!");
    Ok(guards)
}

fn writer_layer<W: Write + Send + 'static>(
    app_name: &str,
    w: W,
    format: LogFormat,
    ansi: bool,
) -> (BoxedLayer, WorkerGuard) {
    match format {
        LogFormat::Json => {
            let (layer, guard) = json_formatted_layer(app_name, w);
            (layer.boxed(), guard)
        }
        LogFormat::Text => {
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(w);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(ansi)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking_writer);
            (layer.boxed(), guard)
        }
    }
}

fn json_formatted_layer<W: Write + Send + 'static>(
    app_name: &str,
    w: W,
) -> (BunyanFormattingLayer<NonBlocking>, WorkerGuard) {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(w);
    (
        BunyanFormattingLayer::new(app_name.to_string(), non_blocking_writer),
        guard,
    )
}
