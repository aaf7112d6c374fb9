//! Tracing setup

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log file written under [`resolve_log_dir`] when `local-logging` is enabled
pub const LOG_FILE_NAME: &str = "video_collector.log";

/// `./log` under the working directory
pub fn resolve_log_dir() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to resolve current directory: {e}"))?;
    Ok(cwd.join("log"))
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default_filter = if verbose {
        "video_collector=debug"
    } else {
        "video_collector=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn init_stderr(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter;
/// `verbose` lowers the default to debug. Safe to call more than once.
pub fn init_tracing(verbose: bool) {
    let filter = env_filter(verbose);

    #[cfg(feature = "local-logging")]
    init_file(filter);

    #[cfg(not(feature = "local-logging"))]
    init_stderr(filter);
}

#[cfg(feature = "local-logging")]
fn init_file(filter: EnvFilter) {
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;

    static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let log_dir = resolve_log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir)
            .map(|_| dir)
            .map_err(|e| format!("Failed to create log directory: {e}"))
    });
    let log_dir = match log_dir {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("{err}; logging to stderr");
            init_stderr(filter);
            return;
        }
    };

    let appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
}
