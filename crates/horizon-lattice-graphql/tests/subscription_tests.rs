//! Integration tests for the subscription engine against an in-process
//! `graphql-ws` server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use horizon_lattice_graphql::{
    CancellationToken, Document, Error, ErrorKind, GraphQLClient, SubscriptionEvent,
    SubscriptionState,
};
use http::HeaderMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

/// Show engine logs with `RUST_LOG=horizon_lattice_graphql=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accept one connection, negotiate `graphql-ws`, and hand the socket to `script`.
///
/// Returns the HTTP endpoint to point a client at, the handshake request
/// headers once a client connects, and the server task.
async fn serve<F, Fut>(script: F) -> (String, oneshot::Receiver<HeaderMap>, JoinHandle<()>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/v1/graphql", listener.local_addr().unwrap());
    let (headers_tx, headers_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut captured = None;
        let socket = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                captured = Some(request.headers().clone());
                response
                    .headers_mut()
                    .insert("sec-websocket-protocol", HeaderValue::from_static("graphql-ws"));
                Ok(response)
            },
        )
        .await
        .unwrap();
        if let Some(headers) = captured {
            let _ = headers_tx.send(headers);
        }
        script(socket).await;
    });

    (endpoint, headers_rx, task)
}

async fn recv_json(socket: &mut ServerSocket) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the socket")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn expect_type(socket: &mut ServerSocket, kind: &str) -> Value {
    let message = recv_json(socket).await;
    assert_eq!(message["type"], kind, "unexpected frame {message}");
    message
}

async fn send_json(socket: &mut ServerSocket, message: Value) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Perform the server side of the handshake and return the operation id.
async fn accept_operation(socket: &mut ServerSocket) -> String {
    expect_type(socket, "connection_init").await;
    send_json(socket, json!({"type": "ka"})).await;
    send_json(socket, json!({"type": "connection_ack"})).await;
    let start = expect_type(socket, "start").await;
    start["id"].as_str().unwrap().to_owned()
}

async fn collect_events(mut events: mpsc::Receiver<SubscriptionEvent>) -> Vec<SubscriptionEvent> {
    let mut collected = Vec::new();
    while let Some(event) = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for events")
    {
        collected.push(event);
    }
    collected
}

#[derive(Debug, Default, Deserialize)]
struct Users {
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[tokio::test]
async fn test_data_is_written_into_target() {
    init_tracing();
    let (endpoint, headers, server) = serve(|mut socket| async move {
        let init = expect_type(&mut socket, "connection_init").await;
        assert_eq!(init["payload"]["token"], "t");
        send_json(&mut socket, json!({"type": "connection_ack"})).await;

        let start = expect_type(&mut socket, "start").await;
        let id = start["id"].as_str().unwrap().to_owned();
        assert_eq!(start["payload"]["query"], "subscription { users { id } }");
        assert_eq!(start["payload"]["variables"], json!({"limit": 1}));

        send_json(&mut socket, json!({"type": "ka"})).await;
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": {"users": [{"id": 7}]}}}),
        )
        .await;
        send_json(&mut socket, json!({"type": "complete", "id": id})).await;

        let stop = expect_type(&mut socket, "stop").await;
        assert_eq!(stop["id"], id.as_str());
    })
    .await;

    let client = GraphQLClient::builder(endpoint)
        .admin_secret("secret")
        .connection_init_payload(json!({"token": "t"}))
        .build()
        .unwrap();
    let target = Arc::new(Mutex::new(Users::default()));
    let (tx, rx) = mpsc::channel(8);

    let document = Document::new("subscription { users { id } }")
        .variable("limit", 1)
        .header("x-hasura-role", "viewer");
    client
        .subscribe(&CancellationToken::new(), document, target.clone(), tx)
        .await
        .expect("subscription failed");

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 2);
    assert!(events[0].has_new_data);
    assert!(events[1].closing);
    assert!(events[1].error.is_none());
    assert_eq!(target.lock().users[0].id, 7);

    let headers = headers.await.unwrap();
    assert_eq!(headers.get("sec-websocket-protocol").unwrap(), "graphql-ws");
    assert_eq!(headers.get("x-hasura-admin-secret").unwrap(), "secret");
    assert_eq!(headers.get("x-hasura-role").unwrap(), "viewer");

    server.await.unwrap();
}

#[tokio::test]
async fn test_each_error_frame_is_a_separate_event() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        let id = accept_operation(&mut socket).await;
        send_json(
            &mut socket,
            json!({"type": "error", "id": id, "payload": {"message": "first"}}),
        )
        .await;
        send_json(
            &mut socket,
            json!({"type": "error", "id": id, "payload": {"message": "second"}}),
        )
        .await;
        send_json(&mut socket, json!({"type": "complete", "id": id})).await;
        expect_type(&mut socket, "stop").await;
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let (tx, rx) = mpsc::channel(8);
    client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await
        .unwrap();

    let events = collect_events(rx).await;
    let messages: Vec<String> = events
        .iter()
        .filter_map(|event| event.error.as_ref())
        .filter_map(|error| error.graphql_error())
        .map(|error| error.message.clone())
        .collect();
    assert_eq!(messages, ["first", "second"]);
    assert!(events.last().unwrap().closing);
    assert_eq!(events.iter().filter(|event| event.closing).count(), 1);

    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_error_while_active_keeps_running() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        let id = accept_operation(&mut socket).await;
        send_json(
            &mut socket,
            json!({"type": "connection_error", "payload": {"message": "token expiring"}}),
        )
        .await;
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": {"users": [{"id": 1}]}}}),
        )
        .await;
        send_json(&mut socket, json!({"type": "complete", "id": id})).await;
        expect_type(&mut socket, "stop").await;
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let target = Arc::new(Mutex::new(Users::default()));
    let (tx, rx) = mpsc::channel(8);
    client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            target.clone(),
            tx,
        )
        .await
        .unwrap();

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 3);
    let error = events[0].error.as_ref().and_then(Error::graphql_error).unwrap();
    assert_eq!(error.message, "token expiring");
    assert!(!events[0].closing);
    assert!(events[1].has_new_data);
    assert!(events[2].closing);
    assert!(events[2].error.is_none());
    assert_eq!(target.lock().users[0].id, 1);

    server.await.unwrap();
}

#[tokio::test]
async fn test_data_errors_and_unknown_frames() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        let id = accept_operation(&mut socket).await;
        // errors inside a data frame are only logged
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": null, "errors": [{"message": "x"}]}}),
        )
        .await;
        send_json(&mut socket, json!({"type": "mystery", "id": id})).await;
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": {"users": "wrong shape"}}}),
        )
        .await;
        send_json(&mut socket, json!({"type": "complete", "id": id})).await;
        expect_type(&mut socket, "stop").await;
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let target = Arc::new(Mutex::new(Users::default()));
    let (tx, rx) = mpsc::channel(8);
    client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            target.clone(),
            tx,
        )
        .await
        .unwrap();

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0].error, Some(Error::Protocol(_))));
    assert!(matches!(events[1].error, Some(Error::Decode(_))));
    assert!(events[2].closing);
    assert!(events.iter().all(|event| !event.has_new_data));
    assert!(target.lock().users.is_empty());

    server.await.unwrap();
}

#[tokio::test]
async fn test_cancel_stops_subscription_promptly() {
    init_tracing();
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        let id = accept_operation(&mut socket).await;
        send_json(
            &mut socket,
            json!({"type": "data", "id": id, "payload": {"data": {"users": []}}}),
        )
        .await;
        let stop = expect_type(&mut socket, "stop").await;
        assert_eq!(stop["id"], id.as_str());
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let mut subscription =
        client.spawn_subscription::<Users>(Document::new("subscription { users { id } }"));

    let first = tokio::time::timeout(WAIT, subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert!(first.has_new_data);
    assert_eq!(subscription.state(), SubscriptionState::Active);

    // the server sends nothing more; the engine is blocked on a read
    subscription.stop();
    let closing = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("closing event should arrive within the grace period")
        .unwrap();
    assert!(closing.closing);
    assert!(closing.error.is_none());

    assert!(subscription.next().await.is_none());
    assert_eq!(subscription.state(), SubscriptionState::Closed);
    subscription.join().await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn test_stalled_consumer_does_not_block_cancellation() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        let id = accept_operation(&mut socket).await;
        for _ in 0..4 {
            send_json(
                &mut socket,
                json!({"type": "data", "id": id, "payload": {"data": {"users": []}}}),
            )
            .await;
        }
        // drain until the client goes away
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let cancel = CancellationToken::new();
    let (tx, _rx) = mpsc::channel(1);

    let run = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            client
                .subscribe(
                    &cancel,
                    Document::new("subscription { users { id } }"),
                    Arc::new(Mutex::new(Users::default())),
                    tx,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let result = tokio::time::timeout(WAIT, run)
        .await
        .expect("engine should finish despite a full event channel")
        .unwrap();
    assert!(result.is_ok());

    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_error_during_handshake() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        expect_type(&mut socket, "connection_init").await;
        send_json(
            &mut socket,
            json!({"type": "connection_error", "payload": {"message": "denied"}}),
        )
        .await;
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let (tx, rx) = mpsc::channel(8);
    let result = client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GraphQL);
    assert_eq!(err.graphql_error().unwrap().message, "denied");

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].closing);
    assert!(matches!(events[0].error, Some(Error::GraphQL(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn test_unexpected_handshake_message() {
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        expect_type(&mut socket, "connection_init").await;
        send_json(&mut socket, json!({"type": "data", "payload": {}})).await;
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let result = client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await;
    assert!(matches!(result, Err(Error::Protocol(_))));

    server.await.unwrap();
}

#[tokio::test]
async fn test_server_disconnect_is_reported() {
    init_tracing();
    let (endpoint, _headers, server) = serve(|mut socket| async move {
        accept_operation(&mut socket).await;
        socket.close(None).await.unwrap();
    })
    .await;

    let client = GraphQLClient::builder(endpoint).build().unwrap();
    let (tx, rx) = mpsc::channel(8);
    client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { users { id } }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await
        .unwrap();

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0].error.as_ref().map(Error::kind),
        Some(ErrorKind::Transport)
    );
    assert!(events[1].closing);

    server.await.unwrap();
}

#[tokio::test]
async fn test_unsupported_scheme_is_usage_error() {
    let client = GraphQLClient::builder("ftp://example.com/graphql")
        .build()
        .unwrap();
    let (tx, rx) = mpsc::channel(8);
    let result = client
        .subscribe(
            &CancellationToken::new(),
            Document::new("subscription { a }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await;
    assert!(matches!(result, Err(Error::Usage(_))));

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].closing);
}

#[tokio::test]
async fn test_cancelled_before_connecting() {
    let client = GraphQLClient::builder("http://127.0.0.1:9/v1/graphql")
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (tx, rx) = mpsc::channel(8);
    let result = client
        .subscribe(
            &cancel,
            Document::new("subscription { a }"),
            Arc::new(Mutex::new(Value::Null)),
            tx,
        )
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].closing);
}
