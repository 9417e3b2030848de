//! Logger builder.

use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{Config, DisplayConfig, Format, Writer};
use crate::error::{LogError, LogResult};

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// Logger builder.
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Keeps the logger's root span entered for its lifetime.
#[derive(Debug)]
pub struct LoggerGuard {
    _root_span: Option<tracing::span::EnteredSpan>,
}

macro_rules! with_writer {
    ($layer:expr, $writer:expr) => {
        match $writer {
            Writer::Stdout => $layer.with_writer(std::io::stdout).boxed(),
            Writer::Stderr => $layer.with_writer(std::io::stderr).boxed(),
            Writer::Test => $layer.with_test_writer().boxed(),
        }
    };
}

fn fmt_layer(format: Format, display: &DisplayConfig, writer: Writer) -> BoxedLayer {
    let base = fmt::layer()
        .with_ansi(display.colors)
        .with_target(display.target)
        .with_file(display.source)
        .with_line_number(display.source)
        .with_thread_ids(display.thread_ids);
    match (format, display.time) {
        (Format::Pretty, true) => with_writer!(base.pretty(), writer),
        (Format::Pretty, false) => with_writer!(base.pretty().without_time(), writer),
        (Format::Compact, true) => with_writer!(base.compact(), writer),
        (Format::Compact, false) => with_writer!(base.compact().without_time(), writer),
        (Format::Json, true) => with_writer!(base.json(), writer),
        (Format::Json, false) => with_writer!(base.json().without_time(), writer),
    }
}

impl LoggerBuilder {
    /// Create builder from config.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Install the global subscriber.
    ///
    /// Fails when the filter directive does not parse or a global
    /// subscriber is already installed.
    pub fn build(self) -> LogResult<LoggerGuard> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {e}", self.config.level)))?;

        Registry::default()
            .with(filter)
            .with(fmt_layer(self.config.format, &self.config.display, self.config.writer))
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        let root_span = self
            .config
            .service
            .as_deref()
            .map(|service| tracing::info_span!("app", service).entered());

        Ok(LoggerGuard {
            _root_span: root_span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_is_rejected_before_install() {
        let err = LoggerBuilder::from_config(Config::test().with_level("arbor=verbose"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LogError::Filter(_)));
    }

    #[test]
    fn init_test_is_idempotent() {
        crate::init_test();
        crate::init_test();
        tracing::debug!("logged through the test writer");
        let err = LoggerBuilder::from_config(Config::test()).build().unwrap_err();
        assert!(matches!(err, LogError::AlreadyInitialized(_)));
    }
}
