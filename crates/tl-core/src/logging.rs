use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "teamlink.log";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides `log_level`. With `log_file` set, a daily rolling
/// file layer is added next to the console layer.
pub fn init_logging(log_level: &str, log_file: Option<&Path>, structured: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_appender = log_file.map(|path| {
        let dir = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        rolling::daily(dir, filename)
    });

    if structured {
        let console = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let file = file_appender.map(|appender| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(appender)
                .with_target(true)
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .init();
    } else {
        let console = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(true);
        let file = file_appender.map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_writer(appender)
                .with_target(true)
                .with_ansi(false)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process.
    #[test]
    fn init_logging_signature() {
        let _ = init_logging as fn(&str, Option<&Path>, bool);
    }
}
