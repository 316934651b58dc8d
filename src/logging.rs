//! Subscriber set-up for front ends embedding this crate.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How much a front end wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Warnings and errors
    #[default]
    Quiet,
    /// Lifecycle messages
    Verbose,
    /// Every hardware step
    Debug,
}

impl Verbosity {
    pub fn level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::WARN,
            Verbosity::Verbose => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
        }
    }

    /// Pick a verbosity from `--verbose`/`--debug` style flags.
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }
}

/// Level filter for `verbosity`, refined by `RUST_LOG`-style directives.
///
/// The chosen level always applies to targets no directive names;
/// `rp1_io=debug` and the like adjust their own targets only.
pub fn build_filter(verbosity: Verbosity, directives: Option<&str>) -> EnvFilter {
    let level = LevelFilter::from_level(verbosity.level());
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.unwrap_or_default())
        .add_directive(level.into())
}

fn subscriber(verbosity: Verbosity, directives: Option<&str>) -> impl Subscriber + Send + Sync {
    FmtSubscriber::builder()
        .with_env_filter(build_filter(verbosity, directives))
        .with_target(false)
        .compact()
        .finish()
}

/// Install a compact global `tracing` subscriber.
///
/// `RUST_LOG` directives are honoured on top of the chosen level.
pub fn init_logging(verbosity: Verbosity) -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing::subscriber::set_global_default(subscriber(verbosity, directives.as_deref()))
        .map_err(|e| ControlError::config_error(format!("failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(true, true).level(), Level::DEBUG);
    }

    #[test]
    fn test_verbosity_sets_enabled_levels() {
        let cases = [
            (Verbosity::Quiet, [true, false, false]),
            (Verbosity::Verbose, [true, true, false]),
            (Verbosity::Debug, [true, true, true]),
        ];
        for (verbosity, [warn, info, debug]) in cases {
            tracing::subscriber::with_default(subscriber(verbosity, None), || {
                assert_eq!(tracing::enabled!(Level::WARN), warn, "{:?} warn", verbosity);
                assert_eq!(tracing::enabled!(Level::INFO), info, "{:?} info", verbosity);
                assert_eq!(tracing::enabled!(Level::DEBUG), debug, "{:?} debug", verbosity);
            });
        }
    }

    #[test]
    fn test_target_directive_raises_crate_level() {
        let filter = build_filter(Verbosity::Quiet, Some("rp1_io=debug"));
        let rendered = filter.to_string();
        assert!(rendered.contains("rp1_io=debug"), "{}", rendered);
        assert!(rendered.contains("warn"), "{}", rendered);
    }

    #[test]
    fn test_second_install_fails() {
        let _ = init_logging(Verbosity::Quiet);
        let err = init_logging(Verbosity::Debug).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
