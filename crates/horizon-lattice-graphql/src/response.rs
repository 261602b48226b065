//! GraphQL response envelope and server errors.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message. Empty when the server omitted it.
    #[serde(default)]
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// Interpret an arbitrary error payload from the subscription protocol.
    ///
    /// Servers send a single error object, an array of them, an object with an
    /// `errors` array, or a bare string. Each reported error is returned in order.
    pub fn from_payload(payload: Option<Value>) -> Vec<Self> {
        match payload {
            Some(Value::String(message)) => vec![Self::new(message)],
            Some(Value::Array(items)) => {
                let errors: Vec<Self> = items.into_iter().map(Self::from_value).collect();
                if errors.is_empty() {
                    vec![Self::new("server reported an empty error list")]
                } else {
                    errors
                }
            }
            Some(Value::Object(mut map)) => match map.remove("errors") {
                Some(errors @ Value::Array(_)) => Self::from_payload(Some(errors)),
                Some(other) => {
                    map.insert("errors".into(), other);
                    vec![Self::from_value(Value::Object(map))]
                }
                None => vec![Self::from_value(Value::Object(map))],
            },
            Some(Value::Null) | None => vec![Self::new("server reported an error without a payload")],
            Some(other) => vec![Self::new(format!("unrecognized error payload: {other}"))],
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self::new(message),
            other => match serde_json::from_value::<Self>(other.clone()) {
                Ok(error) if !error.message.is_empty() => error,
                Ok(mut error) => {
                    error.message = format!("server error: {other}");
                    error
                }
                Err(_) => Self::new(format!("unrecognized error payload: {other}")),
            },
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match segment {
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// The `{data, errors}` wrapper of every GraphQL response.
///
/// `data` may be partially populated when `errors` is non-empty, but is not
/// guaranteed to be meaningful in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The data returned by the operation.
    #[serde(default = "none")]
    pub data: Option<T>,

    /// Errors that occurred during execution, in server order.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<GraphQLError>,
}

fn none<T>() -> Option<T> {
    None
}

/// `"errors": null` means no errors.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<GraphQLError>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<GraphQLError>>::deserialize(deserializer)?.unwrap_or_default())
}

impl<T> Envelope<T> {
    /// Check if the response contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The reported failure: the first error, if any.
    pub fn first_error(&self) -> Option<&GraphQLError> {
        self.errors.first()
    }

    /// Errors beyond the first, which `execute` does not surface.
    pub fn discarded_errors(&self) -> &[GraphQLError] {
        self.errors.get(1..).unwrap_or_default()
    }
}
