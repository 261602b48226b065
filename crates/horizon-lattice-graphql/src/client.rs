//! GraphQL client: configuration and one-shot HTTP execution.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::document::{Document, layer_headers};
use crate::encode::{self, EncodedBody};
use crate::error::{Error, Result};
use crate::log::{LogEvent, TracingLog, TransportLog};
use crate::protocol;
use crate::response::Envelope;

/// Environment variable naming the GraphQL endpoint.
pub const ENV_URL: &str = "HASURA_URL";
/// Environment variable holding the admin secret.
pub const ENV_ADMIN_SECRET: &str = "HASURA_ADMIN_SECRET";

/// Header carrying the Hasura admin secret.
pub const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

/// Configuration for a [`GraphQLClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP endpoint URL.
    pub endpoint: String,
    /// Explicit subscription socket URL; derived from the endpoint when unset.
    pub websocket_url: Option<String>,
    /// Total timeout for each HTTP request.
    pub request_timeout: Option<Duration>,
    /// Timeout for establishing HTTP and WebSocket connections.
    pub connect_timeout: Duration,
    /// User agent sent with HTTP requests.
    pub user_agent: Option<String>,
    /// Ask the server to close the connection after each request.
    pub close_connections: bool,
    /// Capacity of subscription event channels created by the client.
    pub event_buffer: usize,
    /// Payload of the subscription `connection_init` message.
    pub connection_init_payload: Option<Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            websocket_url: None,
            request_timeout: None,
            connect_timeout: Duration::from_secs(30),
            user_agent: Some(format!(
                "HorizonLattice-GraphQL/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
            close_connections: false,
            event_buffer: 32,
            connection_init_payload: None,
        }
    }
}

/// Builder for creating a GraphQL client.
pub struct GraphQLClientBuilder {
    config: ClientConfig,
    headers: HeaderMap,
    build_error: Option<Error>,
    log: Arc<dyn TransportLog>,
}

impl GraphQLClientBuilder {
    /// Create a new builder for the given GraphQL endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(encode::JSON_CONTENT_TYPE));
        Self {
            config: ClientConfig {
                endpoint: url.into(),
                ..ClientConfig::default()
            },
            headers,
            build_error: None,
            log: Arc::new(TracingLog),
        }
    }

    /// Create a builder from `HASURA_URL` and, when present, `HASURA_ADMIN_SECRET`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_URL)
            .map_err(|_| Error::Usage(format!("environment variable {ENV_URL} is not set")))?;
        let mut builder = Self::new(url);
        if let Ok(secret) = std::env::var(ENV_ADMIN_SECRET) {
            builder = builder.admin_secret(secret);
        }
        Ok(builder)
    }

    /// Set a separate WebSocket URL for subscriptions.
    ///
    /// If not set, the HTTP URL is converted to the WebSocket scheme
    /// (http:// -> ws://, https:// -> wss://).
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.config.websocket_url = Some(url.into());
        self
    }

    /// Add a default header value to all requests.
    ///
    /// Repeated calls with the same name accumulate values. Invalid names or
    /// values are reported by [`build`](Self::build).
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) => self.record_error(e.into()),
            (_, Err(e)) => self.record_error(e.into()),
        }
        self
    }

    /// Replace all values of a default header.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        if let Ok(name) = HeaderName::try_from(name) {
            self.headers.remove(&name);
        }
        self.header(name, value)
    }

    /// Add every header in `headers` to the defaults.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Set bearer token authentication.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        self.set_header(AUTHORIZATION.as_str(), &format!("Bearer {}", token.as_ref()))
    }

    /// Authenticate with a Hasura admin secret.
    pub fn admin_secret(self, secret: impl AsRef<str>) -> Self {
        self.set_header(ADMIN_SECRET_HEADER, secret.as_ref())
    }

    /// Set the payload of the subscription `connection_init` message.
    pub fn connection_init_payload(mut self, payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.config.connection_init_payload = Some(value),
            Err(e) => self.record_error(e.into()),
        }
        self
    }

    /// Set the request timeout for HTTP operations.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout for HTTP and WebSocket connections.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Send `Connection: close` with every HTTP request.
    pub fn close_connections(mut self, close: bool) -> Self {
        self.config.close_connections = close;
        self
    }

    /// Set the capacity of subscription event channels.
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity.max(1);
        self
    }

    /// Set the transport log hook.
    pub fn logger(mut self, log: Arc<dyn TransportLog>) -> Self {
        self.log = log;
        self
    }

    fn record_error(&mut self, error: Error) {
        if self.build_error.is_none() {
            self.build_error = Some(error);
        }
    }

    /// Build the GraphQL client.
    pub fn build(self) -> Result<GraphQLClient> {
        if let Some(error) = self.build_error {
            return Err(error);
        }

        let endpoint = url::Url::parse(&self.config.endpoint)?;
        if let Some(ref ws) = self.config.websocket_url {
            url::Url::parse(ws)?;
        }

        let mut builder = reqwest::Client::builder().connect_timeout(self.config.connect_timeout);
        if let Some(timeout) = self.config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(ref user_agent) = self.config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let http = builder.build()?;

        Ok(GraphQLClient {
            inner: Arc::new(GraphQLClientInner {
                http,
                endpoint,
                headers: self.headers,
                config: self.config,
                log: self.log,
            }),
        })
    }
}

pub(crate) struct GraphQLClientInner {
    http: reqwest::Client,
    endpoint: url::Url,
    pub(crate) headers: HeaderMap,
    pub(crate) config: ClientConfig,
    pub(crate) log: Arc<dyn TransportLog>,
}

/// A GraphQL client for queries, mutations, and subscriptions.
///
/// Cloning is cheap; clones share the connection pool and configuration.
///
/// # Example
///
/// ```ignore
/// use horizon_lattice_graphql::{CancellationToken, Document, GraphQLClient};
///
/// let client = GraphQLClient::builder("https://api.example.com/v1/graphql")
///     .admin_secret("secret")
///     .build()?;
///
/// let cancel = CancellationToken::new();
/// let users: Users = client
///     .execute(&cancel, Document::new("{ users { id name } }"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct GraphQLClient {
    pub(crate) inner: Arc<GraphQLClientInner>,
}

impl GraphQLClient {
    /// Create a new builder for configuring a GraphQL client.
    pub fn builder(url: impl Into<String>) -> GraphQLClientBuilder {
        GraphQLClientBuilder::new(url)
    }

    /// Get the HTTP endpoint URL.
    pub fn url(&self) -> &str {
        self.inner.endpoint.as_str()
    }

    /// Get the WebSocket URL used for subscriptions.
    pub fn websocket_url(&self) -> Result<String> {
        match self.inner.config.websocket_url {
            Some(ref url) => Ok(url.clone()),
            None => protocol::websocket_url(self.inner.endpoint.as_str()),
        }
    }

    /// The default headers sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Execute a query or mutation and decode its `data` into `T`.
    ///
    /// If the server reports errors, the first one is returned as
    /// [`Error::GraphQL`] and the rest go to the log hook. A missing or null
    /// `data` field decodes `T` from `null`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        document: Document,
    ) -> Result<T> {
        let envelope = self.fetch(cancel, document).await?;
        if let Some(first) = envelope.first_error() {
            let discarded = envelope.discarded_errors();
            if !discarded.is_empty() {
                self.inner.log.log(&LogEvent::DiscardedErrors(discarded));
            }
            return Err(Error::GraphQL(first.clone()));
        }
        decode_data(envelope.data.unwrap_or(Value::Null))
    }

    /// Execute a document whose result is not needed.
    pub async fn run(&self, cancel: &CancellationToken, document: Document) -> Result<()> {
        self.execute::<IgnoredAny>(cancel, document).await?;
        Ok(())
    }

    /// Execute a document and return the full response envelope, every error included.
    pub async fn execute_response<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        document: Document,
    ) -> Result<Envelope<T>> {
        let envelope = self.fetch(cancel, document).await?;
        let data = match envelope.data {
            Some(Value::Null) | None => None,
            Some(value) => Some(decode_data(value)?),
        };
        Ok(Envelope {
            data,
            errors: envelope.errors,
        })
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        document: Document,
    ) -> Result<Envelope<Value>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if document.is_subscription() {
            return Err(Error::Usage(
                "subscription documents must be sent with subscribe()".into(),
            ));
        }

        let log = &*self.inner.log;
        let (query, variables, files, request_headers) = document.into_parts();
        let encoded = encode::encode(&query, &variables, files)?;

        if encoded.file_count > 0 {
            log.log(&LogEvent::Files(encoded.file_count));
        }
        log.log(&LogEvent::Variables(&encoded.variables));
        log.log(&LogEvent::Query(&query));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, encoded.content_type);
        layer_headers(&mut headers, &self.inner.headers);
        layer_headers(&mut headers, &request_headers);
        if self.inner.config.close_connections {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        log.log(&LogEvent::Headers(&headers));

        let request = self.inner.http.post(self.inner.endpoint.clone());
        let request = match encoded.body {
            EncodedBody::Json(body) => request.body(body),
            EncodedBody::Multipart(form) => request.multipart(form),
        }
        .headers(headers);

        let (status, body) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = send(request) => result?,
        };

        log.log(&LogEvent::Response {
            status,
            body: &String::from_utf8_lossy(&body),
        });

        serde_json::from_slice::<Envelope<Value>>(&body).map_err(|e| {
            if status != 200 {
                Error::HttpStatus { status }
            } else {
                Error::Decode(e.to_string())
            }
        })
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<(u16, Bytes)> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    Ok((status, body))
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::Decode(e.to_string()))
}

impl std::fmt::Debug for GraphQLClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLClient")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("websocket_url", &self.inner.config.websocket_url)
            .finish()
    }
}
