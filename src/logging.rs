use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process or buffered file output is lost.
///
/// `RUST_LOG` overrides `log_level` when set.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard, TryInitError> {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).try_init()?;
    } else {
        let file_layer = fmt::layer()
            .with_target(false) // Hide redundant target in text output
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).try_init()?;
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            log_dir: dir.path().to_string_lossy().into_owned(),
            use_json: true,
            rotation: "never".to_string(),
            ..AppConfig::default()
        };

        let first = init_logging(&config);
        tracing::info!(component = "logging", "subscriber installed");
        let second = init_logging(&config);
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
