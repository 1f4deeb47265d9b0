use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use skein_plugin::PluginConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Initialize console logging, plus a log file when `to_file` is set.
///
/// `RUST_LOG` wins over `debug`; without either the level is info.
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(debug: u8, to_file: bool) -> io::Result<Option<WorkerGuard>> {
    let default_level = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if to_file {
        let log_dir = get_log_directory()?;
        fs::create_dir_all(&log_dir)?;
        let log_path = log_dir.join("skein.log");

        truncate_if_needed(&log_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(io::stderr).with_ansi(true))
            .with(
                fmt::layer()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_target(true),
            )
            .init();

        tracing::info!("Logging to file: {}", log_path.display());

        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();

        Ok(None)
    }
}

fn get_log_directory() -> io::Result<PathBuf> {
    PluginConfig::data_dir()
        .map(|dir| dir.join("logs"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find data directory"))
}

/// Truncate log file if it exceeds MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() {
        let metadata = fs::metadata(log_path)?;
        if metadata.len() > MAX_LOG_SIZE {
            let file = File::create(log_path)?;
            file.set_len(0)?;
        }
    }
    Ok(())
}
