//! Logging initialization and configuration.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{log_dir_path, Config};

/// Initialize the logging system based on configuration.
///
/// Events go to stderr and to a daily-rolling file under the log directory.
/// The returned guard must be kept alive for the lifetime of the daemon so the
/// non-blocking file writer flushes on exit.
pub fn init_logging(cfg: &Config) -> Result<WorkerGuard> {
    let log_dir = log_dir_path();
    std::fs::create_dir_all(&log_dir)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_filter(cfg));

    let file_suffix = match cfg.log.format.to_lowercase().as_str() {
        "json" => "json",
        _ => "log",
    };
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("gatebot")
        .filename_suffix(file_suffix)
        .build(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create rolling file appender: {}", e))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match cfg.log.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(non_blocking))
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_ansi(false).with_writer(non_blocking))
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    tracing::info!(
        level = %cfg.log.level,
        format = %cfg.log.format,
        dir = %log_dir.display(),
        "Logging initialized"
    );

    Ok(guard)
}

/// Build the default filter string: crate-wide level plus per-module overrides.
fn build_filter(cfg: &Config) -> EnvFilter {
    let mut filter = format!("gatebot={}", cfg.log.level);
    for (module, level) in &cfg.log.module_levels {
        filter.push_str(&format!(",{module}={level}"));
    }
    EnvFilter::new(filter)
}
