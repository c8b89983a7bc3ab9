use std::fmt;

use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A structured `name=value` pair attached to a log line.
#[derive(Clone, Copy)]
pub struct LogField<'a> {
    pub name: &'static str,
    pub value: &'a dyn fmt::Display,
}

impl<'a> LogField<'a> {
    pub fn new(name: &'static str, value: &'a dyn fmt::Display) -> Self {
        Self { name, value }
    }
}

impl fmt::Debug for LogField<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.name, self.value)
    }
}

/// Leveled logging capability consumed by retry and completion hooks.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &[LogField<'_>]);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[LogField<'_>]) {}
}

/// Forwards log lines to `tracing` events at the matching level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[LogField<'_>]) {
        let fields = render_fields(fields);
        match level {
            LogLevel::Trace => trace!(fields = %fields, "{message}"),
            LogLevel::Debug => debug!(fields = %fields, "{message}"),
            LogLevel::Info => info!(fields = %fields, "{message}"),
            LogLevel::Warn => warn!(fields = %fields, "{message}"),
            LogLevel::Error => error!(fields = %fields, "{message}"),
        }
    }
}

pub(crate) fn render_fields(fields: &[LogField<'_>]) -> String {
    let mut rendered = String::new();
    for field in fields {
        if !rendered.is_empty() {
            rendered.push(' ');
        }
        rendered.push_str(field.name);
        rendered.push('=');
        rendered.push_str(&field.value.to_string());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::{LogField, LogLevel, render_fields};

    #[test]
    fn render_fields_joins_pairs_with_spaces() {
        let status = 503_u16;
        let method = "GET";
        let rendered = render_fields(&[
            LogField::new("method", &method),
            LogField::new("status", &status),
        ]);
        assert_eq!(rendered, "method=GET status=503");
    }

    #[test]
    fn render_fields_is_empty_without_fields() {
        assert_eq!(render_fields(&[]), "");
    }

    #[test]
    fn log_level_deserializes_from_lowercase_names() {
        let level: LogLevel = serde_json::from_str("\"warn\"").expect("level should parse");
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(LogLevel::default(), LogLevel::Debug);
        assert!(LogLevel::Warn > LogLevel::Debug);
    }
}
