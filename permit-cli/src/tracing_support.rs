//! Logging setup for the `permit` binary.
//!
//! Logs always go to stderr; stdout carries command results only.

use tracing::Level;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TracingFormat {
    /// Multi-line, human-readable.
    Pretty,

    /// One line per event.
    Compact,

    /// JSON lines, for log collectors.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<Level>,

    pub format: TracingFormat,

    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Compact,
            timestamps: true,
            target: false,
        }
    }
}

impl TracingConfig {
    /// Map repeated `-v` flags to a level; zero leaves RUST_LOG in charge
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => None,
            1 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        };
        self.target = self.target || verbose > 0;
        self
    }

    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        match self.level {
            Some(level) => EnvFilter::new(level.to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }

    fn layer(&self) -> BoxedLayer {
        let base = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(self.target);

        match (self.format, self.timestamps) {
            (TracingFormat::Pretty, true) => base.pretty().boxed(),
            (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
            (TracingFormat::Compact, true) => base.compact().boxed(),
            (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
            (TracingFormat::Json, true) => base.json().boxed(),
            (TracingFormat::Json, false) => base.json().without_time().boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already set.
pub fn init_subscriber(config: &TracingConfig) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(config.layer())
        .with(config.filter())
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.format, TracingFormat::Compact);
        assert!(config.level.is_none());
        assert!(config.timestamps);
        assert!(!config.target);
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(TracingConfig::default().with_verbosity(0).level, None);
        assert_eq!(
            TracingConfig::default().with_verbosity(1).level,
            Some(Level::DEBUG)
        );
        let config = TracingConfig::default().with_verbosity(3);
        assert_eq!(config.level, Some(Level::TRACE));
        assert!(config.target);
    }
}
