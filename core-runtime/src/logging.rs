//! # Logging
//!
//! One `tracing` subscriber for the whole workspace:
//!
//! - an [`EnvFilter`] that lets the workspace crates through at the configured
//!   level and everything else at `warn`, unless explicit directives are given
//!   (programmatically or through `AUTHSYNC_LOG`);
//! - a stdout formatter (pretty, compact or flattened JSON);
//! - optionally, a layer mirroring every event to the host's
//!   [`LoggerSink`] with credential-bearing fields redacted.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::logger::{ConsoleLogger, LogLevel};
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::from_env()
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(ConsoleLogger::default()));
//! init_logging(config)?;
//! ```

use bridge_traits::logger::{LogEntry, LogLevel, LoggerSink};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::error::{Error, Result};

/// Filter directives, in `EnvFilter` syntax.
pub const LOG_FILTER_ENV: &str = "AUTHSYNC_LOG";
/// `pretty`, `compact` or `json`.
pub const LOG_FORMAT_ENV: &str = "AUTHSYNC_LOG_FORMAT";

const WORKSPACE_TARGETS: &[&str] = &[
    "authsync_workspace",
    "core_runtime",
    "core_channel",
    "core_persistence",
    "core_auth",
];

/// Field names whose values may carry credentials. Redirect responses and
/// POST bodies embed OAuth codes, so they count as well.
const SENSITIVE_FIELDS: &[&str] = &[
    "token",
    "secret",
    "password",
    "api_key",
    "authorization",
    "url_response",
    "post_body",
    "request_uri",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    /// One flattened JSON object per event.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config(format!("unknown log format `{other}`"))),
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level of the workspace crates when no directives are set.
    pub level: LogLevel,
    /// `EnvFilter` directives replacing the default filter.
    pub directives: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            directives: None,
            logger_sink: None,
            display_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("directives", &self.directives)
            .field("logger_sink", &self.logger_sink.is_some())
            .field("display_target", &self.display_target)
            .finish()
    }
}

impl LoggingConfig {
    /// Defaults overridden by `AUTHSYNC_LOG` and `AUTHSYNC_LOG_FORMAT`.
    ///
    /// An unknown format name is ignored with a note on stderr, since no
    /// subscriber exists yet to report it.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(directives) = std::env::var(LOG_FILTER_ENV) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            match format.parse() {
                Ok(format) => config.format = format,
                Err(error) => eprintln!("{LOG_FORMAT_ENV}: {error}"),
            }
        }
        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let directives = match &self.directives {
            Some(directives) => directives.clone(),
            None => std::iter::once("warn".to_string())
                .chain(
                    WORKSPACE_TARGETS
                        .iter()
                        .map(|target| format!("{target}={}", self.level)),
                )
                .collect::<Vec<_>>()
                .join(","),
        };
        EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("invalid log filter `{directives}`: {e}")))
    }

    fn output_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(self.display_target)
            .with_writer(io::stdout);
        match self.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Json => layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .boxed(),
        }
    }
}

/// Installs the global subscriber. Fails with [`Error::Logging`] when one is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(config.logger_sink.clone().map(SinkLayer::new))
        .with(config.output_layer())
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Replaces the value of a credential-bearing field with `[REDACTED]`.
///
/// ```
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("url_response", "https://x/?code=abc"), "[REDACTED]");
/// assert_eq!(redact_if_sensitive("event_id", "1234"), "1234");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let name = field_name.to_ascii_lowercase();
    if SENSITIVE_FIELDS.iter().any(|sensitive| name.contains(sensitive)) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

fn log_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Mirrors events to a [`LoggerSink`].
struct SinkLayer {
    sink: Arc<dyn LoggerSink>,
}

impl SinkLayer {
    fn new(sink: Arc<dyn LoggerSink>) -> Self {
        Self { sink }
    }

    fn deliver(&self, entry: LogEntry) {
        let sink = self.sink.clone();
        // Errors go to stderr: logging them through tracing would re-enter
        // this layer.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = sink.log(entry).await {
                        eprintln!("logger sink: {error}");
                    }
                });
            }
            Err(_) => {
                if let Err(error) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("logger sink: {error}");
                }
            }
        }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = log_level(metadata.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut fields = EntryFields::default();
        event.record(&mut fields);

        let message = fields.message.unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        entry.fields = fields.values;
        if let Some(span) = ctx.lookup_current() {
            entry = entry.in_span(span.name());
        }
        self.deliver(entry);
    }
}

/// Collects event fields, redacting as it goes.
#[derive(Default)]
struct EntryFields {
    message: Option<String>,
    values: std::collections::BTreeMap<String, String>,
}

impl EntryFields {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values
                    .insert(name.to_string(), redact_if_sensitive(name, &value));
            }
        }
    }
}

impl Visit for EntryFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for RecordingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let filter = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .env_filter()
            .unwrap()
            .to_string();
        for target in ["core_auth=debug", "core_channel=debug", "core_persistence=debug"] {
            assert!(filter.contains(target), "{filter}");
        }
    }

    #[test]
    fn test_directives_replace_default_filter() {
        let filter = LoggingConfig::default()
            .with_directives("core_auth::popup=trace")
            .env_filter()
            .unwrap()
            .to_string();
        assert!(filter.contains("core_auth::popup=trace"));
        assert!(!filter.contains("core_channel"));
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!("xml".parse::<LogFormat>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_redaction() {
        assert_eq!(redact_if_sensitive("id_token", "eyJ..."), REDACTED);
        assert_eq!(redact_if_sensitive("refreshToken", "abc"), REDACTED);
        assert_eq!(redact_if_sensitive("session_id", "s1"), "s1");
    }

    #[test]
    fn test_sink_layer_mirrors_redacted_events() {
        let sink = Arc::new(RecordingSink::default());
        let subscriber = tracing_subscriber::registry().with(SinkLayer::new(sink.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info!(
            target: "core_auth::popup",
            event_id = "e1",
            url_response = "https://app/?code=secret",
            "Popup resolved"
        );
        tracing::trace!(target: "core_auth::popup", "below the sink's level");

        let entries = sink.entries.lock();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.target, "core_auth::popup");
        assert_eq!(entry.message, "Popup resolved");
        assert_eq!(entry.fields.get("event_id").map(String::as_str), Some("e1"));
        assert_eq!(entry.fields.get("url_response").map(String::as_str), Some(REDACTED));
    }
}
