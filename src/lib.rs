//! `stedy` issues HTTP requests under retry policies that recover from transient failures
//! and rate limiting, with a per-call [`Context`] threaded through every attempt.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stedy::prelude::{LogLevel, RetryPolicy, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transient = stedy::transient_retry_policy(Some(3))?;
//!     let response = stedy::get(&transient, "https://api.example.com/v1/items")
//!         .logger(Arc::new(TracingLogger))
//!         .send()
//!         .await?;
//!     println!("status={}", response.status());
//!
//!     let throttled = RetryPolicy::rate_limit(Duration::from_millis(500)).max_retries(5)?;
//!     let created = stedy::post(&throttled, "https://api.example.com/v1/items", r#"{"name":"demo"}"#)
//!         .log_level(LogLevel::Info)
//!         .send()
//!         .await?;
//!     println!("created status={}", created.status());
//!     Ok(())
//! }
//! ```
//!
//! # Policies
//!
//! - [`RetryPolicy::transient`] retries transport faults, `408` and `5xx` immediately.
//! - [`RetryPolicy::rate_limit`] retries `429`, waiting `base × n²` before retry `n`.
//! - [`RetryPolicy::custom`] plugs a [`RetryClassifier`] and a [`Backoff`].
//!
//! Policies are immutable and can be shared across concurrent requests.

mod config;
mod context;
mod error;
mod hooks;
mod logger;
mod pipeline;
mod policy;
mod response;
mod transport;
mod util;

pub use crate::config::RetryPolicyConfig;
pub use crate::context::{Context, RequestDescriptor};
pub use crate::error::{BoxError, Error, ErrorCode, TransportError, TransportErrorKind};
pub use crate::hooks::{AttemptOutcome, LoggingRetryHook, RetryEvent, RetryHook};
pub use crate::logger::{LogField, LogLevel, Logger, NoopLogger, TracingLogger};
pub use crate::pipeline::{RequestBuilder, delete, get, post, put, request};
pub use crate::policy::{
    Attempt, Backoff, Execution, RetryClassifier, RetryDecision, RetryPolicy, TerminalState,
    rate_limit_retry_policy, transient_retry_policy,
};
pub use crate::response::Response;
pub use crate::transport::{HyperTransport, HyperTransportBuilder, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AttemptOutcome, Backoff, Context, Error, ErrorCode, HyperTransport, LogLevel, Logger,
        NoopLogger, RequestBuilder, Response, RetryClassifier, RetryDecision, RetryEvent,
        RetryHook, RetryPolicy, RetryPolicyConfig, TerminalState, TracingLogger, Transport,
        TransportError, TransportErrorKind,
    };
}
