//! Tracing setup for the binary. Stdout carries command responses, so logs
//! go to stderr or to the configured file.

use std::ffi::OsStr;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)
}

/// Invalid directives fall through to the next source, ending at `info`.
fn filter_from(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber. The returned guard must be held until
/// exit so buffered file output is written.
pub fn init(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env_filter(level);

    let Some(path) = log_file else {
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        if installed.is_err() {
            eprintln!("keypin: a tracing subscriber is already installed");
        }
        return None;
    };

    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let file_name = path.file_name().unwrap_or_else(|| OsStr::new("keypin.log"));
    if let Some(dir) = dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("keypin: cannot create log dir {}: {}", dir.display(), e);
        }
    }
    let appender = tracing_appender::rolling::never(dir.unwrap_or_else(|| Path::new(".")), file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    if installed.is_err() {
        eprintln!("keypin: a tracing subscriber is already installed");
        return None;
    }
    Some(guard)
}
