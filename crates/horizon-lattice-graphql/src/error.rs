//! Error types for the GraphQL transport.

use crate::response::GraphQLError;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller misused the API (wrong transport, bad endpoint, malformed document).
    Usage,
    /// Network failure, non-OK status or an undecodable body.
    Transport,
    /// Unexpected or malformed subscription protocol message.
    Protocol,
    /// The server reported an error in the response envelope.
    GraphQL,
    /// The operation was cancelled or timed out.
    Cancelled,
}

/// Errors produced while building, sending or streaming GraphQL documents.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Caller misuse of the client.
    #[error("usage error: {0}")]
    Usage(String),

    /// Invalid endpoint or WebSocket URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid header name or value.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A variable value has no GraphQL scalar mapping.
    #[error("cannot infer GraphQL type of variable `${name}` (value: {value})")]
    TypeInference {
        /// The variable name, without the `$` sigil.
        name: String,
        /// The offending value, rendered as JSON.
        value: String,
    },

    /// A block references `$name` but the query has no such variable.
    #[error("variable `${0}` is referenced but not declared")]
    UndeclaredVariable(String),

    /// The expression tree is structurally invalid.
    #[error("malformed expression tree: {0}")]
    MalformedExpression(String),

    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Connection refused or failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-200 status and an undecodable body.
    #[error("server returned a non-200 status code: {status}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("decoding response: {0}")]
    Decode(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error (reading attachments).
    #[error("I/O error: {0}")]
    Io(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Unexpected or malformed subscription message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reported by the GraphQL server.
    #[error("graphql: {0}")]
    GraphQL(GraphQLError),

    /// The operation was cancelled by the caller.
    #[error("operation was cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_)
            | Self::InvalidUrl(_)
            | Self::InvalidHeader(_)
            | Self::TypeInference { .. }
            | Self::UndeclaredVariable(_)
            | Self::MalformedExpression(_) => ErrorKind::Usage,
            Self::Request(_)
            | Self::Connection(_)
            | Self::HttpStatus { .. }
            | Self::Decode(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::WebSocket(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::GraphQL(_) => ErrorKind::GraphQL,
            Self::Cancelled | Self::Timeout => ErrorKind::Cancelled,
        }
    }

    /// The server-reported error, if this is one.
    pub fn graphql_error(&self) -> Option<&GraphQLError> {
        match self {
            Self::GraphQL(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<GraphQLError> for Error {
    fn from(err: GraphQLError) -> Self {
        Self::GraphQL(err)
    }
}

/// A specialized Result type for GraphQL transport operations.
pub type Result<T> = std::result::Result<T, Error>;
