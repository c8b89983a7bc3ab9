use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{HeaderValue, USER_AGENT};
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
#[cfg(feature = "tls-rustls-ring")]
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;
use crate::error::{Error, TransportError, TransportErrorKind};
use crate::response::Response;
use crate::util::{classify_transport_error, validate_base_url};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_CLIENT_NAME: &str = "stedy";

/// Sends one request and yields the response or a transport fault.
///
/// Implementations should watch `cancellation` and abandon the exchange when it fires;
/// the retry engine also drops the returned future once cancellation is observed.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: Request<Bytes>,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>>;

    /// Base url that relative or empty request urls are resolved against.
    fn base_url(&self) -> Option<&str> {
        None
    }
}

enum TransportClient {
    #[cfg_attr(feature = "tls-rustls-ring", allow(dead_code))]
    Http(Client<HttpConnector, Full<Bytes>>),
    #[cfg(feature = "tls-rustls-ring")]
    Rustls(Client<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

/// Default [`Transport`] on top of the hyper legacy client.
pub struct HyperTransport {
    client: TransportClient,
    base_url: Option<String>,
    request_timeout: Duration,
    max_response_body_bytes: usize,
    user_agent: HeaderValue,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::default()
    }

    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    async fn exchange(
        &self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Response, TransportError> {
        let response = match &self.client {
            TransportClient::Http(client) => client.request(request).await,
            #[cfg(feature = "tls-rustls-ring")]
            TransportClient::Rustls(client) => client.request(request).await,
        }
        .map_err(|source| TransportError::new(classify_transport_error(&source), source))?;

        let (parts, body) = response.into_parts();
        let body = read_all_body_limited(body, self.max_response_body_bytes).await?;
        Ok(Response::new(parts.status, parts.headers, body))
    }
}

impl Transport for HyperTransport {
    fn send<'a>(
        &'a self,
        request: Request<Bytes>,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>> {
        Box::pin(async move {
            let mut request = request.map(Full::new);
            if !request.headers().contains_key(USER_AGENT) {
                request
                    .headers_mut()
                    .insert(USER_AGENT, self.user_agent.clone());
            }
            debug!(method = %request.method(), uri = %request.uri(), "hyper transport send");

            tokio::select! {
                biased;
                () = cancellation.cancelled() => Err(TransportError::new(
                    TransportErrorKind::Other,
                    "request cancelled by caller",
                )),
                result = timeout(self.request_timeout, self.exchange(request)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::new(
                        TransportErrorKind::Timeout,
                        format!(
                            "no response within {}ms",
                            self.request_timeout.as_millis()
                        ),
                    )),
                },
            }
        })
    }

    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

pub struct HyperTransportBuilder {
    base_url: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_response_body_bytes: usize,
    client_name: String,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }
}

impl HyperTransportBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn build(self) -> Result<HyperTransport> {
        if let Some(base_url) = &self.base_url {
            validate_base_url(base_url)?;
        }
        let user_agent = HeaderValue::from_str(&self.client_name).map_err(|_| {
            Error::TransportInit {
                message: format!("client name is not a valid header value: {}", self.client_name),
            }
        })?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(self.connect_timeout));
        let client = build_transport_client(connector)?;

        Ok(HyperTransport {
            client,
            base_url: self.base_url,
            request_timeout: self.request_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
            user_agent,
        })
    }
}

#[cfg(feature = "tls-rustls-ring")]
fn build_transport_client(mut connector: HttpConnector) -> Result<TransportClient> {
    connector.enforce_http(false);
    let https = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|source| Error::TransportInit {
            message: source.to_string(),
        })?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(connector);
    Ok(TransportClient::Rustls(
        Client::builder(TokioExecutor::new()).build(https),
    ))
}

#[cfg(not(feature = "tls-rustls-ring"))]
fn build_transport_client(connector: HttpConnector) -> Result<TransportClient> {
    Ok(TransportClient::Http(
        Client::builder(TokioExecutor::new()).build(connector),
    ))
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> std::result::Result<Bytes, TransportError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| TransportError::new(TransportErrorKind::Read, source))?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(TransportError::new(
                    TransportErrorKind::Other,
                    format!("response body exceeds {max_bytes} bytes"),
                ));
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
