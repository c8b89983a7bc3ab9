use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

/// A fault raised by a [`Transport`](crate::Transport) while sending one attempt.
#[derive(Debug, Error)]
#[error("{kind} transport error: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new<E>(kind: TransportErrorKind, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidMaxRetries,
    InvalidBaseTimeout,
    InvalidPolicyConfig,
    EmptyContextKey,
    MissingContext,
    MissingBody,
    MissingUrl,
    InvalidUri,
    RequestBuild,
    TransportInit,
    Transport,
    Cancelled,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidMaxRetries => "invalid_max_retries",
            Self::InvalidBaseTimeout => "invalid_base_timeout",
            Self::InvalidPolicyConfig => "invalid_policy_config",
            Self::EmptyContextKey => "empty_context_key",
            Self::MissingContext => "missing_context",
            Self::MissingBody => "missing_body",
            Self::MissingUrl => "missing_url",
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::TransportInit => "transport_init",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
            Self::Deserialize => "deserialize",
        }
    }

    /// Configuration errors are raised before any attempt is made and are never retried.
    pub const fn is_configuration(self) -> bool {
        !matches!(self, Self::Transport | Self::Cancelled | Self::Deserialize)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("max retries must be at least 1, got {max_retries}")]
    InvalidMaxRetries { max_retries: i64 },
    #[error("base timeout must be a finite non-negative duration, got {seconds}s")]
    InvalidBaseTimeout { seconds: f64 },
    #[error("invalid retry policy configuration: {message}")]
    InvalidPolicyConfig { message: String },
    #[error("context keys must not be empty")]
    EmptyContextKey,
    #[error("required context entry `{key}` is not set")]
    MissingContext { key: &'static str },
    #[error("{method} requests require a body")]
    MissingBody { method: Method },
    #[error("{method} request has no target url and the transport has no base url")]
    MissingUrl { method: Method },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to initialize http transport: {message}")]
    TransportInit { message: String },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("{method} {uri} was cancelled after {attempts} attempt(s)")]
    Cancelled {
        method: Method,
        uri: String,
        attempts: usize,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidMaxRetries { .. } => ErrorCode::InvalidMaxRetries,
            Self::InvalidBaseTimeout { .. } => ErrorCode::InvalidBaseTimeout,
            Self::InvalidPolicyConfig { .. } => ErrorCode::InvalidPolicyConfig,
            Self::EmptyContextKey => ErrorCode::EmptyContextKey,
            Self::MissingContext { .. } => ErrorCode::MissingContext,
            Self::MissingBody { .. } => ErrorCode::MissingBody,
            Self::MissingUrl { .. } => ErrorCode::MissingUrl,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::TransportInit { .. } => ErrorCode::TransportInit,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub(crate) fn from_transport(error: TransportError, method: &Method, uri: &str) -> Self {
        Self::Transport {
            kind: error.kind,
            method: method.clone(),
            uri: uri.to_owned(),
            source: error.source,
        }
    }
}
