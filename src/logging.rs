//! Tracing setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `COURIER_LOG` is unset.
const DEFAULT_FILTER: &str = "courier=info";

/// Directory for daily-rolling log files.
pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("courier").join("logs"))
}

/// Install the global subscriber: a log file always, stderr when `verbose`.
///
/// Keep the returned guard alive for the life of the process so buffered
/// lines are flushed on exit.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &dir,
    "courier.log",
  ));

  let filter = || {
    EnvFilter::try_from_env("COURIER_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
  };

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter());

  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_filter(filter())
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
