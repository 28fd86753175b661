//! Logging and tracing initialization.
//!
//! A bare level such as `debug` applies to the Montage crates only;
//! everything else logs at `warn`. A level containing directives
//! (`montage_capture=trace,info`) is used as written. `RUST_LOG` overrides
//! both.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Crate targets a bare level applies to. `montage` is the CLI binary.
const MONTAGE_TARGETS: &[&str] = &[
    "montage",
    "montage_common",
    "montage_model",
    "montage_render",
    "montage_capture",
];

/// Level for targets outside the Montage crates.
const DEPENDENCY_LEVEL: &str = "warn";

/// Expand a configured level into filter directives.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        return filter_directives("info");
    }
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directives = vec![DEPENDENCY_LEVEL.to_string()];
    directives.extend(MONTAGE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = filter_directives(&config.level);
        EnvFilter::try_new(&directives).unwrap_or_else(|e| {
            eprintln!("Invalid log level {:?} ({e}), using info", config.level);
            EnvFilter::new(filter_directives("info"))
        })
    })
}

/// Install the global tracing subscriber.
///
/// Thread ids are shown because capture and export work runs on blocking
/// worker threads.
pub fn init_logging(config: &LoggingConfig) {
    let filter = env_filter(config);
    let installed = if config.json {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_targets_montage_crates() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("montage_capture=debug"));
        assert!(directives.contains("montage_render=debug"));
        assert!(directives.contains(",montage=debug"));
    }

    #[test]
    fn test_explicit_directives_are_kept() {
        assert_eq!(
            filter_directives("montage_capture=trace,info"),
            "montage_capture=trace,info"
        );
    }

    #[test]
    fn test_empty_level_means_info() {
        assert_eq!(filter_directives("  "), filter_directives("info"));
    }

    #[test]
    fn test_directives_parse() {
        for level in ["info", "trace", "montage_render=debug"] {
            assert!(EnvFilter::try_new(filter_directives(level)).is_ok(), "{level}");
        }
    }
}
