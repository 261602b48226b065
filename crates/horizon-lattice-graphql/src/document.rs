//! GraphQL documents: query text, variables, attachments and headers.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

impl OperationType {
    /// The keyword that opens an operation of this type.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Determine the operation type from the leading keyword of a document.
    ///
    /// Anonymous shorthand documents (`{ ... }`) are queries.
    pub fn of(text: &str) -> Self {
        let trimmed = text.trim_start();
        [Self::Subscription, Self::Mutation]
            .into_iter()
            .find(|kind| starts_with_keyword(trimmed, kind.keyword()))
            .unwrap_or(Self::Query)
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword).is_some_and(|rest| {
        !rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// A file uploaded alongside a document as a multipart form part.
#[derive(Debug, Clone)]
pub struct FileAttachment {
    /// The form field name.
    pub field: String,
    /// The file name reported to the server.
    pub filename: String,
    /// The file content, moved into the request when it is sent.
    pub content: Bytes,
}

impl FileAttachment {
    /// Create an attachment from in-memory content.
    pub fn new(
        field: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field: field.into(),
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Create an attachment by reading `reader` to the end.
    pub fn from_reader(
        field: impl Into<String>,
        filename: impl Into<String>,
        mut reader: impl Read,
    ) -> Result<Self> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(Self::new(field, filename, content))
    }

    /// Create an attachment from a file on disk, named after its last path component.
    pub async fn from_path(field: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(field, filename, content))
    }
}

/// A GraphQL document ready to be sent.
///
/// Holds the query text, its variable bindings, optional file attachments and
/// per-request headers. Sending a document consumes it.
///
/// # Example
///
/// ```ignore
/// let document = Document::new("query ($key: String!) { items(id: $key) { name } }")
///     .variable("key", "value")
///     .header("x-request-id", "abc");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Document {
    query: String,
    variables: Map<String, Value>,
    files: Vec<FileAttachment>,
    headers: HeaderMap,
}

impl Document {
    /// Create a document from query text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// The document text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The variable bindings.
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// The file attachments, in upload order.
    pub fn files(&self) -> &[FileAttachment] {
        &self.files
    }

    /// The per-request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the per-request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The operation type named by the leading keyword.
    pub fn operation_type(&self) -> OperationType {
        OperationType::of(&self.query)
    }

    /// Check if this document is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type() == OperationType::Subscription
    }

    /// Set a variable value.
    ///
    /// Values that fail to serialize are skipped with a warning; use
    /// [`set_variable`](Self::set_variable) to observe the error.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        if let Err(e) = self.set_variable(name.clone(), value) {
            tracing::warn!(target: "horizon_lattice_graphql::document", "Skipping variable `{}`: {}", name, e);
        }
        self
    }

    /// Set a variable value, reporting serialization failures.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.variables.insert(name.into(), value);
        Ok(())
    }

    /// Replace all variables with an already-built JSON map.
    pub fn variables_map(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Attach a file from in-memory content.
    pub fn file(
        self,
        field: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        self.attachment(FileAttachment::new(field, filename, content))
    }

    /// Append an attachment.
    pub fn attachment(mut self, attachment: FileAttachment) -> Self {
        self.files.push(attachment);
        self
    }

    /// Append a header value. Invalid names or values are skipped with a warning.
    pub fn header(
        mut self,
        name: impl TryInto<HeaderName>,
        value: impl TryInto<HeaderValue>,
    ) -> Self {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                tracing::warn!(target: "horizon_lattice_graphql::document", "Skipping invalid request header");
            }
        }
        self
    }

    pub(crate) fn into_parts(self) -> (String, Map<String, Value>, Vec<FileAttachment>, HeaderMap) {
        (self.query, self.variables, self.files, self.headers)
    }
}

/// Layer `overlay` on top of `base`.
///
/// Every key present in `overlay` has its values in `base` fully replaced by
/// the overlay's values, in order. Keys absent from `overlay` are untouched.
pub(crate) fn layer_headers(base: &mut HeaderMap, overlay: &HeaderMap) {
    for name in overlay.keys() {
        base.remove(name);
        for value in overlay.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}
