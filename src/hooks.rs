use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use http::StatusCode;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, TransportError, TransportErrorKind};
use crate::logger::{LogField, LogLevel};
use crate::policy::TerminalState;
use crate::response::Response;
use crate::util::redact_uri_for_logs;

/// Result of one attempt: a response or a transport fault, never both.
#[derive(Clone, Copy, Debug)]
pub enum AttemptOutcome<'a> {
    Response(&'a Response),
    Fault(&'a TransportError),
}

impl<'a> AttemptOutcome<'a> {
    pub(crate) fn of(result: &'a std::result::Result<Response, TransportError>) -> Self {
        match result {
            Ok(response) => Self::Response(response),
            Err(fault) => Self::Fault(fault),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Response(response) => Some(response.status()),
            Self::Fault(_) => None,
        }
    }

    pub fn fault_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Response(_) => None,
            Self::Fault(fault) => Some(fault.kind()),
        }
    }
}

/// Passed to a [`RetryHook`] once per consumed retry, before the backoff wait.
#[derive(Clone, Copy, Debug)]
pub struct RetryEvent<'a> {
    /// 1-based retry number.
    pub attempt: usize,
    pub max_retries: Option<usize>,
    pub delay: Duration,
    pub outcome: AttemptOutcome<'a>,
}

pub trait RetryHook: Send + Sync {
    fn on_retry(&self, context: &Context, event: &RetryEvent<'_>);
}

/// Logs every retry at warn level through the context's logger.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingRetryHook;

impl RetryHook for LoggingRetryHook {
    fn on_retry(&self, context: &Context, event: &RetryEvent<'_>) {
        let method = context
            .method()
            .map(ToString::to_string)
            .unwrap_or_else(|_| "-".to_owned());
        let url = context
            .url()
            .map(redact_uri_for_logs)
            .unwrap_or_else(|_| "-".to_owned());
        let max_retries = event
            .max_retries
            .map(|max| max.to_string())
            .unwrap_or_else(|| "unbounded".to_owned());
        let delay_ms = event.delay.as_millis();

        match event.outcome {
            AttemptOutcome::Response(response) => {
                let status = response.status().as_u16();
                context.logger().log(
                    LogLevel::Warn,
                    "retrying http request after retriable response",
                    &[
                        LogField::new("attempt", &event.attempt),
                        LogField::new("max_retries", &max_retries),
                        LogField::new("delay_ms", &delay_ms),
                        LogField::new("method", &method),
                        LogField::new("url", &url),
                        LogField::new("status", &status),
                    ],
                );
            }
            AttemptOutcome::Fault(fault) => {
                context.logger().log(
                    LogLevel::Warn,
                    "retrying http request after transport fault",
                    &[
                        LogField::new("attempt", &event.attempt),
                        LogField::new("max_retries", &max_retries),
                        LogField::new("delay_ms", &delay_ms),
                        LogField::new("method", &method),
                        LogField::new("url", &url),
                        LogField::new("error", fault),
                    ],
                );
            }
        }
    }
}

/// Runs an instrumentation callback, discarding any panic it raises.
pub(crate) fn run_guarded(hook_name: &'static str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        debug!(hook = hook_name, "instrumentation hook panicked; ignoring");
    }
}

/// Terminal log line, emitted once per outer invocation.
pub(crate) fn log_completion(
    context: &Context,
    level: LogLevel,
    state: TerminalState,
    attempts: usize,
    result: &std::result::Result<Response, Error>,
) {
    let method = context
        .method()
        .map(ToString::to_string)
        .unwrap_or_else(|_| "-".to_owned());
    let url = context
        .url()
        .map(redact_uri_for_logs)
        .unwrap_or_else(|_| "-".to_owned());
    let outcome = match result {
        Ok(response) => response.status().as_u16().to_string(),
        Err(error) => error.code().as_str().to_owned(),
    };

    context.logger().log(
        level,
        "http request completed",
        &[
            LogField::new("method", &method),
            LogField::new("url", &url),
            LogField::new("outcome", &outcome),
            LogField::new("state", &state),
            LogField::new("attempts", &attempts),
        ],
    );
}
