//! Tracing subscriber setup.

use std::io;

use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Error, Result};

/// Level used when neither flags nor `RUST_LOG` say otherwise.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Resolve the log level from the configured value and the verbosity flags.
pub fn effective_level(configured: &str, verbose: bool, quiet: bool) -> String {
    if quiet {
        String::from("warn")
    } else if verbose {
        String::from("debug")
    } else if configured.trim().is_empty() {
        String::from(DEFAULT_LOG_LEVEL)
    } else {
        configured.trim().to_ascii_lowercase()
    }
}

/// Install the global stderr subscriber. `RUST_LOG` takes precedence over
/// `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    stderr_subscriber(filter)
        .try_init()
        .map_err(|err| Error::Logging {
            reason: err.to_string(),
        })
}

fn stderr_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level("INFO", false, false), "info");
        assert_eq!(effective_level("error", true, false), "debug");
        assert_eq!(effective_level("debug", false, true), "warn");
        assert_eq!(effective_level("  ", false, false), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_subscriber_filters_by_level() {
        let subscriber = stderr_subscriber(EnvFilter::new("warn"));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(tracing::Level::WARN));
            assert!(!tracing::enabled!(tracing::Level::DEBUG));
        });
    }
}
