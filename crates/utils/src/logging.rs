//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable holding a log file path; logs go to stderr when unset
pub const LOG_PATH_ENV_VAR: &str = "VGPU_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "vgpu-plugin.log";

/// Boxed formatting layer plus the guard that flushes its writer on drop
pub type FmtLayer<S> = (Box<dyn Layer<S> + Send + Sync>, Option<WorkerGuard>);

/// Split a log path into the rotation directory and the file name prefix.
///
/// A directory path keeps the default prefix.
pub fn rotation_target(log_path: &Path) -> (PathBuf, String) {
    if log_path.is_dir() {
        return (log_path.to_path_buf(), DEFAULT_LOG_PREFIX.to_string());
    }
    let parent = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX);
    (parent.to_path_buf(), prefix.to_string())
}

/// Build the formatting layer, writing to a daily rolling file when a path is
/// given and to stderr otherwise.
pub fn get_fmt_layer<S, P>(log_path: Option<P>) -> FmtLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    P: AsRef<Path>,
{
    if let Some(log_path) = log_path {
        let (dir, prefix) = rotation_target(log_path.as_ref());
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(3)
            .build(&dir)
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed();
                return (layer, Some(guard));
            }
            Err(err) => {
                eprintln!(
                    "failed to create rolling log file at {}: {err}; falling back to stderr",
                    dir.display()
                );
            }
        }
    }

    let layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed();
    (layer, None)
}

/// initiate the global tracing subscriber
pub fn init<P: AsRef<Path>>(log_path: Option<P>) -> Option<WorkerGuard> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let (fmt_layer, guard) = get_fmt_layer::<tracing_subscriber::Registry, P>(log_path);

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn rotation_target_splits_file_path() {
        let (dir, prefix) = rotation_target(Path::new("/var/log/vgpu/plugin.log"));
        assert_eq!(dir, PathBuf::from("/var/log/vgpu"));
        assert_eq!(prefix, "plugin.log");
    }

    #[test]
    fn rotation_target_bare_file_uses_cwd() {
        let (dir, prefix) = rotation_target(Path::new("plugin.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(prefix, "plugin.log");
    }

    #[test]
    fn rotation_target_directory_keeps_default_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, prefix) = rotation_target(tmp.path());
        assert_eq!(dir, tmp.path().to_path_buf());
        assert_eq!(prefix, DEFAULT_LOG_PREFIX);
    }
}
