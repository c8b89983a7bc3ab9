use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::Error;
use crate::logger::{Logger, NoopLogger};
use crate::transport::Transport;

pub(crate) const TRANSPORT_KEY: &str = "transport";
pub(crate) const METHOD_KEY: &str = "method";
pub(crate) const URL_KEY: &str = "url";

/// Method, target url and optional body of one outer invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>, body: Option<Bytes>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Data threaded through a single policy execution, including all of its retries.
///
/// The named slots cover what the execution pipeline needs. Optional slots fall back to
/// safe defaults (a never-cancelled token, a [`NoopLogger`]); required slots fail with
/// [`Error::MissingContext`] when read before being set. Callers building their own
/// policies can attach extra values under non-empty string keys with [`Context::set`].
pub struct Context {
    transport: Option<Arc<dyn Transport>>,
    method: Option<Method>,
    url: Option<String>,
    body: Option<Bytes>,
    cancellation: Option<CancellationToken>,
    logger: Arc<dyn Logger>,
    entries: BTreeMap<String, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Context")
            .field("has_transport", &self.transport.is_some())
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("cancellation", &self.cancellation)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            transport: None,
            method: None,
            url: None,
            body: None,
            cancellation: None,
            logger: Arc::new(NoopLogger),
            entries: BTreeMap::new(),
        }
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.transport = Some(transport);
        self
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = Some(method);
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = Some(url.into());
        self
    }

    pub fn set_body(&mut self, body: Bytes) -> &mut Self {
        self.body = Some(body);
        self
    }

    pub fn set_request(&mut self, request: RequestDescriptor) -> &mut Self {
        self.method = Some(request.method);
        self.url = Some(request.url);
        self.body = request.body;
        self
    }

    pub fn set_cancellation(&mut self, cancellation: CancellationToken) -> &mut Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn set_logger(&mut self, logger: Arc<dyn Logger>) -> &mut Self {
        self.logger = logger;
        self
    }

    pub fn transport(&self) -> Result<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or(Error::MissingContext {
            key: TRANSPORT_KEY,
        })
    }

    pub fn method(&self) -> Result<&Method> {
        self.method
            .as_ref()
            .ok_or(Error::MissingContext { key: METHOD_KEY })
    }

    pub fn url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .ok_or(Error::MissingContext { key: URL_KEY })
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Rebuilds the request descriptor from the stored method, url and body.
    pub fn request(&self) -> Result<RequestDescriptor> {
        Ok(RequestDescriptor {
            method: self.method()?.clone(),
            url: self.url()?.to_owned(),
            body: self.body.clone(),
        })
    }

    /// The caller's cancellation signal, or a token nobody can cancel.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone().unwrap_or_default()
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn set<T>(&mut self, key: impl Into<String>, value: T) -> Result<&mut Self>
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::EmptyContextKey);
        }
        self.entries.insert(key, Box::new(value));
        Ok(self)
    }

    /// Returns the value under `key`, or `T::default()` when it is missing or holds another type.
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: Any + Clone + Default,
    {
        Ok(self.get_ref::<T>(key)?.cloned().unwrap_or_default())
    }

    pub fn get_ref<T>(&self, key: &str) -> Result<Option<&T>>
    where
        T: Any,
    {
        if key.is_empty() {
            return Err(Error::EmptyContextKey);
        }
        Ok(self
            .entries
            .get(key)
            .and_then(|value| value.downcast_ref::<T>()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::EmptyContextKey);
        }
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use tokio_util::sync::CancellationToken;

    use super::{Context, RequestDescriptor};
    use crate::error::{Error, ErrorCode};

    #[test]
    fn optional_slots_fall_back_to_safe_defaults() {
        let context = Context::new();
        assert!(!context.cancellation().is_cancelled());
        assert!(context.body().is_none());
        context.logger().log(crate::LogLevel::Warn, "ignored", &[]);
    }

    #[test]
    fn required_slots_fail_fast_when_unset() {
        let context = Context::new();
        match context.url() {
            Err(Error::MissingContext { key }) => assert_eq!(key, "url"),
            other => panic!("unexpected url lookup result: {other:?}"),
        }
        assert_eq!(
            context.method().expect_err("method is unset").code(),
            ErrorCode::MissingContext
        );
        assert!(context.transport().is_err());
        assert!(context.request().is_err());
    }

    #[test]
    fn set_overwrites_and_chains() {
        let mut context = Context::new();
        context
            .set("tenant", "alpha".to_owned())
            .expect("non-empty key")
            .set("tenant", "beta".to_owned())
            .expect("non-empty key")
            .set("limit", 7_u32)
            .expect("non-empty key");

        assert_eq!(context.get::<String>("tenant").expect("lookup"), "beta");
        assert_eq!(context.get::<u32>("limit").expect("lookup"), 7);
    }

    #[test]
    fn get_returns_default_for_missing_or_mismatched_values() {
        let mut context = Context::new();
        context.set("limit", 7_u32).expect("non-empty key");

        assert_eq!(context.get::<String>("limit").expect("lookup"), "");
        assert_eq!(context.get::<u64>("absent").expect("lookup"), 0);
        assert!(context.get_ref::<u32>("Limit").expect("lookup").is_none());
    }

    #[test]
    fn empty_keys_are_rejected() {
        let mut context = Context::new();
        assert!(matches!(context.set("", 1_u8), Err(Error::EmptyContextKey)));
        assert!(matches!(context.get::<u8>(""), Err(Error::EmptyContextKey)));
        assert!(matches!(context.remove(""), Err(Error::EmptyContextKey)));
    }

    #[test]
    fn request_is_rebuilt_from_stored_slots() {
        let mut context = Context::new();
        context.set_request(RequestDescriptor::new(
            Method::PUT,
            "https://api.example.com/v1/items/1",
            Some(Bytes::from_static(b"{}")),
        ));

        let request = context.request().expect("method and url are set");
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url(), "https://api.example.com/v1/items/1");
        assert_eq!(request.body(), Some(&Bytes::from_static(b"{}")));
    }

    #[test]
    fn cancellation_accessor_shares_the_seeded_token() {
        let token = CancellationToken::new();
        let mut context = Context::new();
        context.set_cancellation(token.clone());
        token.cancel();
        assert!(context.cancellation().is_cancelled());
    }
}
