use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::{Method, StatusCode};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::Result;
use crate::context::Context;
use crate::error::{Error, TransportError};
use crate::hooks::{AttemptOutcome, LoggingRetryHook, RetryEvent, RetryHook, run_guarded};
use crate::response::Response;
use crate::util::redact_uri_for_logs;

/// Inner action run once per attempt.
pub trait Attempt: Send + Sync {
    fn attempt<'a>(
        &'a self,
        context: &'a Context,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>>;
}

impl<F> Attempt for F
where
    F: for<'a> Fn(
            &'a Context,
            &'a CancellationToken,
        ) -> BoxFuture<'a, std::result::Result<Response, TransportError>>
        + Send
        + Sync,
{
    fn attempt<'a>(
        &'a self,
        context: &'a Context,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>> {
        self(context, cancellation)
    }
}

#[derive(Clone, Debug)]
pub struct RetryDecision<'a> {
    /// 1-based number of the attempt that produced `outcome`.
    pub attempt: usize,
    pub max_retries: Option<usize>,
    pub outcome: AttemptOutcome<'a>,
}

/// Decides whether an attempt outcome should be retried.
///
/// Returning `false` for a response accepts it; returning `false` for a fault surfaces it
/// immediately as a non-retriable failure.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision<'_>, context: &Context) -> bool;
}

/// Delay before the `n`th retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Immediate,
    Constant(Duration),
    /// `base × n²`
    Quadratic { base: Duration },
}

impl Backoff {
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Constant(delay) => delay,
            Self::Quadratic { base } => {
                let retry = retry.max(1) as u128;
                let nanos = base
                    .as_nanos()
                    .saturating_mul(retry.saturating_mul(retry));
                duration_from_nanos_saturating(nanos)
            }
        }
    }
}

fn duration_from_nanos_saturating(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

#[derive(Clone)]
enum Classifier {
    Transient,
    RateLimit,
    Custom(Arc<dyn RetryClassifier>),
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => formatter.write_str("Transient"),
            Self::RateLimit => formatter.write_str("RateLimit"),
            Self::Custom(_) => formatter.write_str("Custom"),
        }
    }
}

/// How a policy execution ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalState {
    Succeeded,
    Exhausted,
    Cancelled,
    NonRetriableFailure,
}

impl TerminalState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::NonRetriableFailure => "non_retriable_failure",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Execution {
    pub result: Result<Response>,
    pub state: TerminalState,
    pub attempts: usize,
}

/// Immutable retry rule: what to retry, how long to wait, and how many times.
///
/// A policy keeps no per-execution state and can be shared across concurrent calls.
#[derive(Clone)]
pub struct RetryPolicy {
    classifier: Classifier,
    backoff: Backoff,
    max_retries: Option<usize>,
    retry_hook: Arc<dyn RetryHook>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("classifier", &self.classifier)
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Transient-error policy: retries transport faults, 408 and 5xx responses without delay.
pub fn transient_retry_policy(max_retries: Option<usize>) -> Result<RetryPolicy> {
    RetryPolicy::transient().with_max_retries(max_retries)
}

/// Rate-limit policy: retries 429 responses, waiting `base_timeout × n²` before retry `n`.
pub fn rate_limit_retry_policy(
    base_timeout: Duration,
    max_retries: Option<usize>,
) -> Result<RetryPolicy> {
    RetryPolicy::rate_limit(base_timeout).with_max_retries(max_retries)
}

impl RetryPolicy {
    pub fn transient() -> Self {
        Self::new(Classifier::Transient, Backoff::Immediate)
    }

    pub fn rate_limit(base_timeout: Duration) -> Self {
        Self::new(
            Classifier::RateLimit,
            Backoff::Quadratic { base: base_timeout },
        )
    }

    /// Like [`RetryPolicy::rate_limit`], rejecting negative or non-finite second counts.
    pub fn rate_limit_secs_f64(base_timeout_secs: f64) -> Result<Self> {
        let base_timeout = Duration::try_from_secs_f64(base_timeout_secs).map_err(|_| {
            Error::InvalidBaseTimeout {
                seconds: base_timeout_secs,
            }
        })?;
        Ok(Self::rate_limit(base_timeout))
    }

    pub fn custom(classifier: Arc<dyn RetryClassifier>, backoff: Backoff) -> Self {
        Self::new(Classifier::Custom(classifier), backoff)
    }

    fn new(classifier: Classifier, backoff: Backoff) -> Self {
        Self {
            classifier,
            backoff,
            max_retries: None,
            retry_hook: Arc::new(LoggingRetryHook),
        }
    }

    /// Caps the number of retries after the first attempt.
    pub fn max_retries(mut self, max_retries: usize) -> Result<Self> {
        if max_retries < 1 {
            return Err(Error::InvalidMaxRetries {
                max_retries: max_retries as i64,
            });
        }
        self.max_retries = Some(max_retries);
        Ok(self)
    }

    pub fn with_max_retries(self, max_retries: Option<usize>) -> Result<Self> {
        match max_retries {
            Some(max_retries) => self.max_retries(max_retries),
            None => Ok(self.unbounded()),
        }
    }

    pub fn unbounded(mut self) -> Self {
        self.max_retries = None;
        self
    }

    pub fn retry_hook(mut self, retry_hook: Arc<dyn RetryHook>) -> Self {
        self.retry_hook = retry_hook;
        self
    }

    pub fn configured_max_retries(&self) -> Option<usize> {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        self.backoff.delay_for_retry(retry)
    }

    pub fn should_retry(&self, decision: &RetryDecision<'_>, context: &Context) -> bool {
        match &self.classifier {
            Classifier::Transient => match decision.outcome {
                AttemptOutcome::Fault(_) => true,
                AttemptOutcome::Response(response) => is_transient_status(response.status()),
            },
            Classifier::RateLimit => {
                decision.outcome.status() == Some(StatusCode::TOO_MANY_REQUESTS)
            }
            Classifier::Custom(classifier) => classifier.should_retry(decision, context),
        }
    }

    /// Runs `action` under this policy and returns the caller-visible result.
    pub async fn execute<A>(&self, context: &Context, action: &A) -> Result<Response>
    where
        A: Attempt + ?Sized,
    {
        self.execute_detailed(context, action).await.result
    }

    pub async fn execute_detailed<A>(&self, context: &Context, action: &A) -> Execution
    where
        A: Attempt + ?Sized,
    {
        let cancellation = context.cancellation();
        let mut retries = 0_usize;

        loop {
            if cancellation.is_cancelled() {
                return cancelled(context, retries);
            }

            let attempt = retries + 1;
            let span = info_span!(
                "stedy.attempt",
                attempt = attempt,
                max_retries = ?self.max_retries
            );
            let outcome = tokio::select! {
                biased;
                () = cancellation.cancelled() => None,
                result = action.attempt(context, &cancellation).instrument(span) => Some(result),
            };
            let Some(outcome) = outcome else {
                debug!(attempt, "attempt abandoned after cancellation");
                return cancelled(context, attempt);
            };

            let decision = RetryDecision {
                attempt,
                max_retries: self.max_retries,
                outcome: AttemptOutcome::of(&outcome),
            };
            if !self.should_retry(&decision, context) {
                return match outcome {
                    Ok(response) => Execution {
                        result: Ok(response),
                        state: TerminalState::Succeeded,
                        attempts: attempt,
                    },
                    Err(_) if cancellation.is_cancelled() => cancelled(context, attempt),
                    Err(fault) => Execution {
                        result: Err(transport_error(context, fault)),
                        state: TerminalState::NonRetriableFailure,
                        attempts: attempt,
                    },
                };
            }

            if cancellation.is_cancelled() {
                return cancelled(context, attempt);
            }
            if self.max_retries.is_some_and(|max_retries| retries >= max_retries) {
                debug!(attempt, "retry budget exhausted");
                return Execution {
                    result: outcome.map_err(|fault| transport_error(context, fault)),
                    state: TerminalState::Exhausted,
                    attempts: attempt,
                };
            }

            retries += 1;
            let delay = self.delay_for_retry(retries);
            let event = RetryEvent {
                attempt: retries,
                max_retries: self.max_retries,
                delay,
                outcome: AttemptOutcome::of(&outcome),
            };
            run_guarded("retry", || self.retry_hook.on_retry(context, &event));

            if !wait_for_retry(delay, &cancellation).await {
                return cancelled(context, attempt);
            }
        }
    }
}

/// Sleeps for `delay`; returns `false` when cancellation fires first.
async fn wait_for_retry(delay: Duration, cancellation: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancellation.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancellation.cancelled() => false,
        () = sleep(delay) => true,
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status.as_u16() >= 500
}

fn request_identity(context: &Context) -> (Method, String) {
    let method = context.method().cloned().unwrap_or_default();
    let uri = context.url().map(redact_uri_for_logs).unwrap_or_default();
    (method, uri)
}

fn transport_error(context: &Context, fault: TransportError) -> Error {
    let (method, uri) = request_identity(context);
    Error::from_transport(fault, &method, &uri)
}

fn cancelled(context: &Context, attempts: usize) -> Execution {
    let (method, uri) = request_identity(context);
    Execution {
        result: Err(Error::Cancelled {
            method,
            uri,
            attempts,
        }),
        state: TerminalState::Cancelled,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;

    use super::{
        Backoff, RetryClassifier, RetryDecision, RetryPolicy, rate_limit_retry_policy,
        transient_retry_policy,
    };
    use crate::context::Context;
    use crate::error::{Error, TransportError, TransportErrorKind};
    use crate::hooks::AttemptOutcome;
    use crate::response::Response;

    fn retries_response(policy: &RetryPolicy, status: u16) -> bool {
        let response =
            Response::from_status(StatusCode::from_u16(status).expect("valid status code"));
        let decision = RetryDecision {
            attempt: 1,
            max_retries: policy.configured_max_retries(),
            outcome: AttemptOutcome::Response(&response),
        };
        policy.should_retry(&decision, &Context::new())
    }

    fn retries_fault(policy: &RetryPolicy) -> bool {
        let fault = TransportError::new(TransportErrorKind::Connect, "connection refused");
        let decision = RetryDecision {
            attempt: 1,
            max_retries: None,
            outcome: AttemptOutcome::Fault(&fault),
        };
        policy.should_retry(&decision, &Context::new())
    }

    #[test]
    fn quadratic_backoff_grows_with_square_of_retry() {
        let policy = RetryPolicy::rate_limit(Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(9));
    }

    #[test]
    fn quadratic_backoff_saturates_instead_of_overflowing() {
        let backoff = Backoff::Quadratic {
            base: Duration::from_secs(u64::MAX / 2),
        };
        assert_eq!(backoff.delay_for_retry(usize::MAX), Duration::MAX);
    }

    #[test]
    fn quadratic_backoff_stays_exact_for_large_retry_numbers() {
        let backoff = Backoff::Quadratic {
            base: Duration::from_nanos(1),
        };
        assert_eq!(backoff.delay_for_retry(70_000), Duration::from_millis(4_900));
        assert_eq!(
            backoff.delay_for_retry(1_000_000),
            Duration::from_secs(1_000)
        );
    }

    #[test]
    fn transient_policy_never_waits() {
        let policy = RetryPolicy::transient();
        assert_eq!(policy.delay_for_retry(1), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(50), Duration::ZERO);
    }

    #[test]
    fn transient_policy_retries_faults_timeouts_and_server_errors() {
        let policy = RetryPolicy::transient();
        assert!(retries_fault(&policy));
        assert!(retries_response(&policy, 408));
        assert!(retries_response(&policy, 500));
        assert!(retries_response(&policy, 503));
        assert!(retries_response(&policy, 600));
        assert!(retries_response(&policy, 999));
        assert!(!retries_response(&policy, 429));
        assert!(!retries_response(&policy, 404));
        assert!(!retries_response(&policy, 200));
    }

    #[test]
    fn rate_limit_policy_retries_only_too_many_requests() {
        let policy = RetryPolicy::rate_limit(Duration::from_millis(10));
        assert!(retries_response(&policy, 429));
        assert!(!retries_response(&policy, 500));
        assert!(!retries_response(&policy, 200));
        assert!(!retries_fault(&policy));
    }

    #[test]
    fn custom_classifier_receives_decision_and_context() {
        struct RetryWhenFlagged;

        impl RetryClassifier for RetryWhenFlagged {
            fn should_retry(&self, decision: &RetryDecision<'_>, context: &Context) -> bool {
                decision.outcome.status() == Some(StatusCode::CONFLICT)
                    && context.get::<bool>("retry-conflicts").unwrap_or(false)
            }
        }

        let policy = RetryPolicy::custom(Arc::new(RetryWhenFlagged), Backoff::Immediate);
        let response = Response::from_status(StatusCode::CONFLICT);
        let decision = RetryDecision {
            attempt: 1,
            max_retries: None,
            outcome: AttemptOutcome::Response(&response),
        };

        let mut context = Context::new();
        assert!(!policy.should_retry(&decision, &context));
        context.set("retry-conflicts", true).expect("non-empty key");
        assert!(policy.should_retry(&decision, &context));
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        let error = transient_retry_policy(Some(0)).expect_err("zero retries is invalid");
        assert!(matches!(error, Error::InvalidMaxRetries { max_retries: 0 }));
        assert!(rate_limit_retry_policy(Duration::from_secs(1), Some(0)).is_err());
    }

    #[test]
    fn negative_base_timeout_is_rejected() {
        let error = RetryPolicy::rate_limit_secs_f64(-1.0).expect_err("negative timeout");
        assert!(matches!(error, Error::InvalidBaseTimeout { .. }));
        assert!(RetryPolicy::rate_limit_secs_f64(f64::NAN).is_err());
        assert!(RetryPolicy::rate_limit_secs_f64(0.0).is_ok());
    }

    #[test]
    fn omitted_max_retries_means_unbounded() {
        let policy = transient_retry_policy(None).expect("unbounded policy");
        assert_eq!(policy.configured_max_retries(), None);

        let policy = transient_retry_policy(Some(3)).expect("bounded policy");
        assert_eq!(policy.configured_max_retries(), Some(3));
        assert_eq!(policy.unbounded().configured_max_retries(), None);
    }
}
