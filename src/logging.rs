use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Send logs to a daily rolling file under `dir` so stdout stays for output.
///
/// The returned guard flushes the writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(dir, "fare-wallet.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new("fare_wallet=info"))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  tracing_subscriber::registry()
    .with(env_filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
