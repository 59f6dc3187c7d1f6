//! Logging for the pulseboard binaries
//!
//! Both the server and the CLI append to one daily-rotated file under
//! `$XDG_STATE_HOME/pulseboard/`. The server may mirror records to stderr.
//!
//! Every aggregation cycle polls several HTTP APIs, so the HTTP client stack
//! is held at `warn` unless `RUST_LOG` asks for more.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose per-request chatter would drown out source results
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Install the global subscriber.
///
/// Records from the `log` facade (actix-web's access log) land in the same
/// file. Keep the returned guard alive for the life of the process; dropping
/// it flushes pending writes.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_path = Config::log_path();
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_name = log_path
        .file_name()
        .ok_or_else(|| Error::Config(format!("invalid log path {}", log_path.display())))?;
    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = config
        .stderr
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        log_file = %log_path.display(),
        level = %config.level,
        stderr = config.stderr,
        pid = std::process::id(),
        "Logging initialized"
    );

    Ok(LoggingGuard { _worker: guard })
}

/// Filter for a configured level, with the HTTP stack capped at `warn`
fn level_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    if level.is_empty() || level.contains([',', '=']) {
        return Err(Error::Config(format!(
            "logging.level must be a single level, got {:?}",
            level
        )));
    }

    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));

    EnvFilter::try_new(directives.join(","))
        .map_err(|e| Error::Config(format!("invalid logging.level {:?}: {}", level, e)))
}

/// Keeps the background log writer running
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_quiets_http_stack() {
        let filter = level_filter("debug").unwrap().to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("hyper=warn"));
    }

    #[test]
    fn test_level_filter_rejects_directive_lists() {
        assert!(level_filter("").is_err());
        assert!(level_filter("info,hyper=trace").is_err());
        assert!(level_filter("  ").is_err());
    }

    #[test]
    fn test_log_file_lives_in_state_dir() {
        assert_eq!(Config::log_path().parent(), Some(Config::state_dir().as_path()));
    }
}
