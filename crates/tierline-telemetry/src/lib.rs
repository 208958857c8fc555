//! Tracing setup for tierline binaries.
//!
//! Log output goes to stderr so command output on stdout stays clean.
//! `RUST_LOG` takes priority over the verbosity chosen on the command line:
//!
//! ```bash
//! RUST_LOG=tierline_core=trace tierline check recording.json
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors from subscriber setup.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Subscriber options.
#[derive(Clone, Debug)]
pub struct TracingOptions {
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_directive: String,
    /// Colour escapes in log lines.
    pub ansi: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self { default_directive: "info".into(), ansi: true }
    }
}

impl TracingOptions {
    /// Options for a `-v` count: 0 is `info`, 1 `debug`, more is `trace`.
    pub fn for_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        Self { default_directive: level.into(), ..Self::default() }
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The filter this configuration installs, honouring `RUST_LOG`.
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.default_directive).map_err(|source| TelemetryError::Filter {
            directive: self.default_directive.clone(),
            source,
        })
    }
}

/// Install the global subscriber: an env filter plus a stderr fmt layer.
pub fn init(options: &TracingOptions) -> Result<(), TelemetryError> {
    let filter = options.filter()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(options.ansi))
        .try_init()?;
    tracing::debug!(directive = %options.default_directive, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(TracingOptions::for_verbosity(0).default_directive, "info");
        assert_eq!(TracingOptions::for_verbosity(1).default_directive, "debug");
        assert_eq!(TracingOptions::for_verbosity(9).default_directive, "trace");
        assert!(!TracingOptions::default().with_ansi(false).ansi);
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let options = TracingOptions { default_directive: "tierline_core=notalevel".into(), ansi: false };
        // RUST_LOG may be set in the environment running the tests.
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(options.filter(), Err(TelemetryError::Filter { .. })));
        }
    }

    #[test]
    fn test_second_init_fails() {
        let options = TracingOptions::default().with_ansi(false);
        if init(&options).is_err() {
            return;
        }
        assert!(matches!(init(&options), Err(TelemetryError::AlreadyInitialized(_))));
    }
}
