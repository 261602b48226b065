//! Injected structured-logging hook for the transport.
//!
//! The client reports what it sends and receives through a [`TransportLog`]
//! passed at construction. Implementations observe only; nothing they do can
//! change the outcome of a request.

use std::fmt;

use http::HeaderMap;
use serde_json::{Map, Value};

use crate::response::GraphQLError;

/// Something the transport wants to report.
#[derive(Debug, Clone, Copy)]
pub enum LogEvent<'a> {
    /// Number of file attachments in a multipart request.
    Files(usize),
    /// Serialized variables, exactly as sent.
    Variables(&'a str),
    /// The document text.
    Query(&'a str),
    /// The final request headers.
    Headers(&'a HeaderMap),
    /// The raw response body.
    Response {
        /// HTTP status code.
        status: u16,
        /// Body text (lossily decoded).
        body: &'a str,
    },
    /// Errors beyond the first, which are not returned to the caller.
    DiscardedErrors(&'a [GraphQLError]),
    /// A subscription lifecycle or payload note.
    Subscription {
        /// The operation id, once assigned.
        operation_id: Option<&'a str>,
        /// Free-form detail.
        message: &'a str,
    },
}

impl fmt::Display for LogEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Files(count) => write!(f, ">> files: {count}"),
            Self::Variables(vars) => write!(f, ">> variables: {vars}"),
            Self::Query(query) => write!(f, ">> query: {query}"),
            Self::Headers(headers) => write!(f, ">> headers: {headers:?}"),
            Self::Response { status, body } => write!(f, "<< {status} {body}"),
            Self::DiscardedErrors(errors) => {
                write!(f, "discarded {} additional error(s):", errors.len())?;
                for err in errors.iter() {
                    write!(f, " [{err}]")?;
                }
                Ok(())
            }
            Self::Subscription {
                operation_id: Some(id),
                message,
            } => write!(f, "subscription {id}: {message}"),
            Self::Subscription {
                operation_id: None,
                message,
            } => write!(f, "subscription: {message}"),
        }
    }
}

/// Receives transport log events.
pub trait TransportLog: Send + Sync {
    /// Record one event.
    fn log(&self, event: &LogEvent<'_>);
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl TransportLog for TracingLog {
    fn log(&self, event: &LogEvent<'_>) {
        match event {
            LogEvent::DiscardedErrors(_) => {
                tracing::warn!(target: "horizon_lattice_graphql::http", "{}", event);
            }
            LogEvent::Subscription { .. } => {
                tracing::debug!(target: "horizon_lattice_graphql::subscription", "{}", event);
            }
            _ => tracing::debug!(target: "horizon_lattice_graphql::http", "{}", event),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl TransportLog for NoopLog {
    fn log(&self, _event: &LogEvent<'_>) {}
}

/// Render a variable map the way it is logged.
pub(crate) fn variables_text(variables: &Map<String, Value>) -> String {
    serde_json::to_string(variables).unwrap_or_default()
}
