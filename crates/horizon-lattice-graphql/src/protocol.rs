//! The `graphql-ws` subscription wire protocol.
//!
//! Frames are JSON text messages of the shape `{type, id?, payload?}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{Error, Result};

/// The WebSocket subprotocol negotiated during the handshake.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Client to server messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the protocol session.
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Start an operation.
    Start { id: String, payload: StartPayload },
    /// Stop an operation.
    Stop { id: String },
}

/// Payload of a `start` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartPayload {
    /// Subscription document text.
    pub query: String,
    /// Variables, always sent as an object.
    pub variables: Map<String, Value>,
}

impl ClientMessage {
    pub(crate) fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Server to client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The session was accepted.
    ConnectionAck,
    /// The session was rejected, or the server reports a session-level error.
    ConnectionError(Option<Value>),
    /// Keep-alive (`ka`).
    KeepAlive,
    /// A result for an operation.
    Data {
        id: Option<String>,
        payload: Option<Value>,
    },
    /// An operation failed.
    Error {
        id: Option<String>,
        payload: Option<Value>,
    },
    /// The server finished an operation.
    Complete {
        id: Option<String>,
    },
    /// A well-formed frame of a type this client does not handle.
    Other {
        kind: String,
    },
}

impl ServerMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("malformed frame: {e}")))?;
        Ok(match raw.kind.as_str() {
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError(raw.payload),
            "ka" => Self::KeepAlive,
            "data" => Self::Data {
                id: raw.id,
                payload: raw.payload,
            },
            "error" => Self::Error {
                id: raw.id,
                payload: raw.payload,
            },
            "complete" => Self::Complete { id: raw.id },
            _ => Self::Other { kind: raw.kind },
        })
    }

    /// The frame type as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError(_) => "connection_error",
            Self::KeepAlive => "ka",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::Other { kind } => kind,
        }
    }
}

/// Derive the subscription socket URL from an HTTP endpoint.
///
/// `http` becomes `ws` and `https` becomes `wss`; `ws` and `wss` are kept.
/// Any other scheme is a usage error.
pub fn websocket_url(endpoint: &str) -> Result<String> {
    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Usage(format!(
                "cannot derive a WebSocket URL from scheme `{other}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::InvalidUrl(format!("cannot rewrite scheme of {endpoint}")))?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_json() {
        let init = ClientMessage::ConnectionInit { payload: None };
        assert_eq!(init.to_json().unwrap(), r#"{"type":"connection_init"}"#);

        let start = ClientMessage::Start {
            id: "op".into(),
            payload: StartPayload {
                query: "subscription { a }".into(),
                variables: Map::new(),
            },
        };
        let value: Value = serde_json::from_str(&start.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "start", "id": "op", "payload": {"query": "subscription { a }", "variables": {}}})
        );

        let stop = ClientMessage::Stop { id: "op".into() };
        assert_eq!(stop.to_json().unwrap(), r#"{"type":"stop","id":"op"}"#);
    }

    #[test]
    fn test_parse_server_messages() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"connection_ack"}"#).unwrap(),
            ServerMessage::ConnectionAck
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"ka"}"#).unwrap(),
            ServerMessage::KeepAlive
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"data","id":"1","payload":{"data":{"a":1}}}"#)
                .unwrap(),
            ServerMessage::Data {
                id: Some("1".into()),
                payload: Some(json!({"data": {"a": 1}}))
            }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"pong"}"#).unwrap().kind(),
            "pong"
        );
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:8080/v1/graphql").unwrap(),
            "ws://localhost:8080/v1/graphql"
        );
        assert_eq!(
            websocket_url("https://api.example.com/graphql").unwrap(),
            "wss://api.example.com/graphql"
        );
        assert_eq!(
            websocket_url("wss://api.example.com/graphql").unwrap(),
            "wss://api.example.com/graphql"
        );
        assert!(matches!(
            websocket_url("ftp://example.com/graphql"),
            Err(Error::Usage(_))
        ));
    }
}
