//! Tracing setup and the `~/.shiftagg` path helpers.
//!
//! Two sinks share one filter:
//!
//! - `shiftagg.log` in the log directory, rolled daily, one flattened JSON
//!   object per event so fields like `line_id` can be grepped directly
//! - compact stderr output for the operator
//!
//! The filter covers only the shiftagg crates. `-v` raises them to DEBUG,
//! `-vv` additionally lets the engine emit a TRACE line per skipped event.
//! `RUST_LOG` replaces the whole filter when set.
//!
//! ```no_run
//! use shiftagg_core::logging::{self, Verbosity};
//!
//! let _guard = logging::init_logging(None, Verbosity::from(1)).expect("logging init");
//! tracing::debug!(line_id = "LINE-1", events = 12, "folded line");
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, ShiftaggError};

/// Crates whose events pass the default filter.
pub const LOG_TARGETS: [&str; 3] = ["shiftagg", "shiftagg_config", "shiftagg_engine"];

/// Daily-rolled log file name prefix.
pub const LOG_FILE_NAME: &str = "shiftagg.log";

/// Database file name under the home directory.
pub const DATABASE_FILE_NAME: &str = "shiftagg.db";

/// How chatty the shiftagg crates are, from the `-v` count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Pass summaries and lifecycle messages
    #[default]
    Normal,
    /// Per-line and per-bucket detail
    Debug,
    /// Per-event engine decisions
    Trace,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl Verbosity {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub fn directives(self) -> String {
        LOG_TARGETS
            .iter()
            .map(|target| {
                let level = match (self, *target) {
                    (Verbosity::Normal, _) => "info",
                    (Verbosity::Trace, "shiftagg_engine") => "trace",
                    _ => "debug",
                };
                format!("{target}={level}")
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Flushes the file sink when dropped; hold it until `main` returns.
pub struct LogGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// `log_dir` defaults to `~/.shiftagg/logs/` and is created if missing.
pub fn init_logging(log_dir: Option<PathBuf>, verbosity: Verbosity) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };
    ensure_dir(&log_dir)?;

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let detailed = verbosity > Verbosity::Normal;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(detailed)
                .with_file(detailed)
                .with_line_number(detailed),
        )
        .init();

    tracing::debug!(log_dir = %log_dir.display(), ?verbosity, "logging initialized");

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Console-only logging for tests; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(Verbosity::Trace.directives()))
        .with_test_writer()
        .try_init();
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ShiftaggError::DirectoryCreation {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// `~/.shiftagg/`
pub fn default_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| ShiftaggError::Internal {
        message: "home directory could not be determined".into(),
    })?;
    Ok(home.join(".shiftagg"))
}

/// `~/.shiftagg/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(default_home_dir()?.join("logs"))
}

/// `~/.shiftagg/shiftagg.db`
pub fn default_database_path() -> Result<PathBuf> {
    Ok(default_home_dir()?.join(DATABASE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flag_count() {
        assert_eq!(Verbosity::from(0), Verbosity::Normal);
        assert_eq!(Verbosity::from(1), Verbosity::Debug);
        assert_eq!(Verbosity::from(2), Verbosity::Trace);
        assert_eq!(Verbosity::from(7), Verbosity::Trace);
    }

    #[test]
    fn test_directives_per_verbosity() {
        assert_eq!(
            Verbosity::Normal.directives(),
            "shiftagg=info,shiftagg_config=info,shiftagg_engine=info"
        );
        assert_eq!(
            Verbosity::Debug.directives(),
            "shiftagg=debug,shiftagg_config=debug,shiftagg_engine=debug"
        );
        // Only the engine goes to trace; config stays readable
        assert_eq!(
            Verbosity::Trace.directives(),
            "shiftagg=debug,shiftagg_config=debug,shiftagg_engine=trace"
        );
    }

    #[test]
    fn test_directives_parse_as_filter() {
        for v in [Verbosity::Normal, Verbosity::Debug, Verbosity::Trace] {
            assert!(EnvFilter::try_new(v.directives()).is_ok());
        }
    }

    #[test]
    fn test_default_paths_under_home() {
        assert!(default_log_dir().unwrap().ends_with(".shiftagg/logs"));
        assert!(
            default_database_path()
                .unwrap()
                .ends_with(".shiftagg/shiftagg.db")
        );
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let base = std::env::temp_dir().join(format!("shiftagg-logdir-{}", std::process::id()));
        let nested = base.join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}
