use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Method, Request};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;
use crate::context::{Context, RequestDescriptor};
use crate::error::{Error, TransportError, TransportErrorKind};
use crate::hooks::{log_completion, run_guarded};
use crate::logger::{LogLevel, Logger};
use crate::policy::{Attempt, RetryPolicy, TerminalState};
use crate::response::Response;
use crate::transport::{HyperTransport, Transport};
use crate::util::resolve_uri;

pub fn request<'p>(
    policy: &'p RetryPolicy,
    method: Method,
    url: impl Into<String>,
) -> RequestBuilder<'p> {
    RequestBuilder::new(policy, method, url.into())
}

pub fn get<'p>(policy: &'p RetryPolicy, url: impl Into<String>) -> RequestBuilder<'p> {
    request(policy, Method::GET, url)
}

pub fn delete<'p>(policy: &'p RetryPolicy, url: impl Into<String>) -> RequestBuilder<'p> {
    request(policy, Method::DELETE, url)
}

pub fn post<'p>(
    policy: &'p RetryPolicy,
    url: impl Into<String>,
    body: impl Into<Bytes>,
) -> RequestBuilder<'p> {
    request(policy, Method::POST, url).body(body)
}

pub fn put<'p>(
    policy: &'p RetryPolicy,
    url: impl Into<String>,
    body: impl Into<Bytes>,
) -> RequestBuilder<'p> {
    request(policy, Method::PUT, url).body(body)
}

/// One outer invocation: a request descriptor plus the optional collaborators that
/// are seeded into a fresh [`Context`] when [`RequestBuilder::send`] runs.
#[must_use = "requests do nothing until `send` is awaited"]
pub struct RequestBuilder<'p> {
    policy: &'p RetryPolicy,
    method: Method,
    url: String,
    body: Option<Bytes>,
    transport: Option<Arc<dyn Transport>>,
    logger: Option<Arc<dyn Logger>>,
    cancellation: Option<CancellationToken>,
    log_level: LogLevel,
}

impl std::fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestBuilder")
            .field("policy", self.policy)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("has_transport", &self.transport.is_some())
            .field("has_logger", &self.logger.is_some())
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl<'p> RequestBuilder<'p> {
    fn new(policy: &'p RetryPolicy, method: Method, url: String) -> Self {
        Self {
            policy,
            method,
            url,
            body: None,
            transport: None,
            logger: None,
            cancellation: None,
            log_level: LogLevel::default(),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Level of the completion log line. Defaults to [`LogLevel::Debug`].
    pub fn log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub async fn send(self) -> Result<Response> {
        let policy = self.policy;
        let log_level = self.log_level;
        let mut rejected = Context::new();
        rejected
            .set_method(self.method.clone())
            .set_url(self.url.clone());
        if let Some(logger) = &self.logger {
            rejected.set_logger(Arc::clone(logger));
        }

        let context = match self.into_context() {
            Ok(context) => context,
            Err(error) => {
                let result = Err(error);
                run_guarded("completion", || {
                    log_completion(
                        &rejected,
                        log_level,
                        TerminalState::NonRetriableFailure,
                        0,
                        &result,
                    );
                });
                return result;
            }
        };

        let execution = policy.execute_detailed(&context, &SendAttempt).await;
        run_guarded("completion", || {
            log_completion(
                &context,
                log_level,
                execution.state,
                execution.attempts,
                &execution.result,
            );
        });
        execution.result
    }

    /// Validates the arguments and seeds the execution context.
    fn into_context(self) -> Result<Context> {
        let Self {
            method,
            url,
            body,
            transport,
            logger,
            cancellation,
            ..
        } = self;

        if body.is_none() && requires_body(&method) {
            return Err(Error::MissingBody { method });
        }

        // A transport created here lives only as long as this call.
        let transport = match transport {
            Some(transport) => transport,
            None => {
                debug!(%method, "no transport supplied; creating a per-call transport");
                Arc::new(HyperTransport::new()?) as Arc<dyn Transport>
            }
        };

        let base_url = transport.base_url();
        if url.trim().is_empty() && base_url.is_none() {
            return Err(Error::MissingUrl { method });
        }
        let (uri_text, _) = resolve_uri(base_url, &url)?;

        let mut context = Context::new();
        context
            .set_transport(transport)
            .set_request(RequestDescriptor::new(method, uri_text, body));
        if let Some(cancellation) = cancellation {
            context.set_cancellation(cancellation);
        }
        if let Some(logger) = logger {
            context.set_logger(logger);
        }

        context.transport()?;
        build_http_request(&context)?;
        Ok(context)
    }
}

fn requires_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// Reconstructs the outgoing request strictly from the context's method, url and body.
fn build_http_request(context: &Context) -> Result<Request<Bytes>> {
    let request = context.request()?;
    Request::builder()
        .method(request.method().clone())
        .uri(request.url())
        .body(request.body().cloned().unwrap_or_default())
        .map_err(|source| Error::RequestBuild { source })
}

struct SendAttempt;

impl Attempt for SendAttempt {
    fn attempt<'a>(
        &'a self,
        context: &'a Context,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>> {
        Box::pin(async move {
            // The context is validated before the first attempt and stays borrowed
            // immutably for the whole execution.
            let transport = context
                .transport()
                .map_err(|error| TransportError::new(TransportErrorKind::Other, error))?;
            let request = build_http_request(context)
                .map_err(|error| TransportError::new(TransportErrorKind::Other, error))?;
            transport.send(request, cancellation).await
        })
    }
}
