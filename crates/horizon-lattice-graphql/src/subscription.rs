//! Live subscriptions over WebSocket.
//!
//! Implements the legacy `graphql-ws` protocol (`connection_init`, `start`,
//! `data`, `stop`). Each subscription owns one socket for its whole lifetime.
//! A reader task decodes frames and forwards them to the engine, which races
//! them against the caller's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::client::GraphQLClient;
use crate::document::{Document, layer_headers};
use crate::error::{Error, Result};
use crate::log::LogEvent;
use crate::protocol::{ClientMessage, SUBPROTOCOL, ServerMessage, StartPayload};
use crate::response::GraphQLError;

/// How long the engine waits to deliver the final closing event.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How long the engine spends sending `stop` and closing the socket.
const STOP_GRACE: Duration = Duration::from_secs(1);

const INBOUND_BUFFER: usize = 16;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;

/// Lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// Opening the socket.
    #[default]
    Connecting,
    /// Waiting for `connection_ack`.
    Handshaking,
    /// The operation is running.
    Active,
    /// Sending `stop` and releasing the socket.
    Stopping,
    /// Terminal.
    Closed,
}

/// A notification from a running subscription.
///
/// Decoded data is never carried in the event; it is written into the
/// subscription target before `has_new_data` is signalled.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionEvent {
    /// The target holds a newly decoded payload.
    pub has_new_data: bool,
    /// An error reported by the server or the transport.
    pub error: Option<Error>,
    /// The subscription has ended; no further events follow.
    pub closing: bool,
}

impl SubscriptionEvent {
    fn new_data() -> Self {
        Self {
            has_new_data: true,
            ..Self::default()
        }
    }

    fn error(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    fn closing(error: Option<Error>) -> Self {
        Self {
            error,
            closing: true,
            ..Self::default()
        }
    }
}

/// Shared view of a subscription's lifecycle state.
#[derive(Debug, Clone, Default)]
struct StateCell(Arc<Mutex<SubscriptionState>>);

impl StateCell {
    fn get(&self) -> SubscriptionState {
        *self.0.lock()
    }

    fn set(&self, state: SubscriptionState) {
        *self.0.lock() = state;
    }
}

/// The engine's end of the event channel.
struct EventSink<'a> {
    events: mpsc::Sender<SubscriptionEvent>,
    cancel: &'a CancellationToken,
}

impl EventSink<'_> {
    /// Deliver an event. Returns `false` once the caller has cancelled or
    /// stopped listening.
    async fn emit(&self, event: SubscriptionEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Deliver the final event, consuming the sink.
    async fn close(self, error: Option<Error>) {
        let closing = self.events.send(SubscriptionEvent::closing(error));
        if tokio::time::timeout(CLOSE_GRACE, closing).await.is_err() {
            tracing::debug!(target: "horizon_lattice_graphql::subscription", "Dropped closing event: receiver is not draining");
        }
    }
}

/// Frames forwarded by the reader task.
enum Inbound {
    Message(ServerMessage),
    Malformed(Error),
    Failed(Error),
}

/// Aborts the reader task when the engine lets go of the socket.
struct ReaderGuard(JoinHandle<()>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn read_task(mut read: SplitStream<Socket>, tx: mpsc::Sender<Inbound>) {
    while let Some(frame) = read.next().await {
        let inbound = match frame {
            Ok(Message::Text(text)) => match ServerMessage::parse(&text) {
                Ok(message) => Inbound::Message(message),
                Err(e) => Inbound::Malformed(e),
            },
            Ok(Message::Binary(_)) => {
                Inbound::Malformed(Error::Protocol("unexpected binary frame".into()))
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(Inbound::Failed(e.into())).await;
                return;
            }
        };
        if tx.send(inbound).await.is_err() {
            return;
        }
    }
    let _ = tx
        .send(Inbound::Failed(Error::WebSocket(
            "connection closed by server".into(),
        )))
        .await;
}

async fn send_message(write: &mut SocketSink, message: &ClientMessage) -> Result<()> {
    write.send(Message::Text(message.to_json()?.into())).await?;
    Ok(())
}

/// An open, acknowledged protocol session.
struct Session {
    write: SocketSink,
    inbound: mpsc::Receiver<Inbound>,
    _reader: ReaderGuard,
}

impl GraphQLClient {
    /// Run a subscription until it is cancelled, completed by the server, or
    /// fails.
    ///
    /// Every decoded payload is stored in `target` before a `has_new_data`
    /// event is sent on `events`. Errors after the operation starts are
    /// delivered as events and do not end the subscription, except a failed
    /// socket read. A final `closing` event is sent on every exit path.
    ///
    /// Returns an error if the subscription never became active (bad URL,
    /// failed connection or handshake, or cancellation before then).
    pub async fn subscribe<T>(
        &self,
        cancel: &CancellationToken,
        document: Document,
        target: Arc<Mutex<T>>,
        events: mpsc::Sender<SubscriptionEvent>,
    ) -> Result<()>
    where
        T: DeserializeOwned,
    {
        self.subscribe_with_state(cancel, document, &target, events, &StateCell::default())
            .await
    }

    /// Start a subscription on a background task.
    ///
    /// The returned handle receives events and exposes the decoded target.
    /// Dropping the handle cancels the subscription. Must be called from
    /// within a Tokio runtime.
    pub fn spawn_subscription<T>(&self, document: Document) -> Subscription<T>
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        let (events_tx, events) = mpsc::channel(self.inner.config.event_buffer);
        let cancel = CancellationToken::new();
        let target = Arc::new(Mutex::new(T::default()));
        let state = StateCell::default();

        let task = tokio::spawn({
            let client = self.clone();
            let cancel = cancel.clone();
            let target = target.clone();
            let state = state.clone();
            async move {
                client
                    .subscribe_with_state(&cancel, document, &target, events_tx, &state)
                    .await
            }
        });

        Subscription {
            events,
            cancel,
            target,
            state,
            task: Some(task),
        }
    }

    async fn subscribe_with_state<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        document: Document,
        target: &Mutex<T>,
        events: mpsc::Sender<SubscriptionEvent>,
        state: &StateCell,
    ) -> Result<()> {
        let sink = EventSink { events, cancel };
        let result = self.drive(cancel, document, target, &sink, state).await;
        state.set(SubscriptionState::Closed);
        self.note(None, "closed");
        sink.close(result.as_ref().err().cloned()).await;
        result
    }

    async fn drive<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        document: Document,
        target: &Mutex<T>,
        sink: &EventSink<'_>,
        state: &StateCell,
    ) -> Result<()> {
        state.set(SubscriptionState::Connecting);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (query, variables, _files, request_headers) = document.into_parts();
        let mut session = self.connect(cancel, &request_headers).await?;

        state.set(SubscriptionState::Handshaking);
        self.handshake(cancel, &mut session).await?;

        state.set(SubscriptionState::Active);
        let operation_id = Uuid::new_v4().to_string();
        self.note(Some(&operation_id), "starting");
        send_message(
            &mut session.write,
            &ClientMessage::Start {
                id: operation_id.clone(),
                payload: StartPayload { query, variables },
            },
        )
        .await?;

        self.receive(cancel, &mut session, &operation_id, target, sink)
            .await;

        state.set(SubscriptionState::Stopping);
        self.stop(session, operation_id).await;
        Ok(())
    }

    async fn connect(
        &self,
        cancel: &CancellationToken,
        request_headers: &http::HeaderMap,
    ) -> Result<Session> {
        let url = self.websocket_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut headers = self.inner.headers.clone();
        layer_headers(&mut headers, request_headers);
        layer_headers(request.headers_mut(), &headers);
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        self.note(None, &format!("connecting to {url}"));
        let connect = tokio::time::timeout(
            self.inner.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        );
        let (socket, _) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            connected = connect => connected.map_err(|_| Error::Timeout)??,
        };

        let (write, read) = socket.split();
        let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let reader = ReaderGuard(tokio::spawn(read_task(read, tx)));

        Ok(Session {
            write,
            inbound,
            _reader: reader,
        })
    }

    async fn handshake(&self, cancel: &CancellationToken, session: &mut Session) -> Result<()> {
        let init = ClientMessage::ConnectionInit {
            payload: self.inner.config.connection_init_payload.clone(),
        };
        send_message(&mut session.write, &init).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = session.inbound.recv() => next,
            };
            match next {
                Some(Inbound::Message(ServerMessage::ConnectionAck)) => {
                    self.note(None, "connection acknowledged");
                    return Ok(());
                }
                Some(Inbound::Message(ServerMessage::KeepAlive)) => {}
                Some(Inbound::Message(ServerMessage::ConnectionError(payload))) => {
                    let error = GraphQLError::from_payload(payload)
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| GraphQLError::new("connection rejected"));
                    return Err(Error::GraphQL(error));
                }
                Some(Inbound::Message(other)) => {
                    return Err(Error::Protocol(format!(
                        "unexpected `{}` message during handshake",
                        other.kind()
                    )));
                }
                Some(Inbound::Malformed(e)) | Some(Inbound::Failed(e)) => return Err(e),
                None => {
                    return Err(Error::WebSocket(
                        "connection closed during handshake".into(),
                    ));
                }
            }
        }
    }

    async fn receive<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        operation_id: &str,
        target: &Mutex<T>,
        sink: &EventSink<'_>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.note(Some(operation_id), "cancelled");
                    return;
                }
                _ = sink.events.closed() => {
                    self.note(Some(operation_id), "event receiver dropped");
                    return;
                }
                next = session.inbound.recv() => next,
            };

            let delivered = match next {
                Some(Inbound::Message(ServerMessage::KeepAlive)) => true,
                Some(Inbound::Message(ServerMessage::Data { id, payload })) => {
                    if id.as_deref().is_some_and(|id| id != operation_id) {
                        self.note(Some(operation_id), "ignoring data for another operation");
                        continue;
                    }
                    match self.apply_data(operation_id, payload, target) {
                        Some(event) => sink.emit(event).await,
                        None => true,
                    }
                }
                Some(Inbound::Message(
                    ServerMessage::Error { payload, .. } | ServerMessage::ConnectionError(payload),
                )) => {
                    let mut delivered = true;
                    for error in GraphQLError::from_payload(payload) {
                        if !sink.emit(SubscriptionEvent::error(Error::GraphQL(error))).await {
                            delivered = false;
                            break;
                        }
                    }
                    delivered
                }
                Some(Inbound::Message(ServerMessage::Complete { id })) => {
                    if id.as_deref().is_none_or(|id| id == operation_id) {
                        self.note(Some(operation_id), "completed by server");
                        return;
                    }
                    true
                }
                Some(Inbound::Message(other)) => {
                    let error =
                        Error::Protocol(format!("unexpected `{}` message", other.kind()));
                    sink.emit(SubscriptionEvent::error(error)).await
                }
                Some(Inbound::Malformed(e)) => sink.emit(SubscriptionEvent::error(e)).await,
                Some(Inbound::Failed(e)) => {
                    self.note(Some(operation_id), &format!("read failed: {e}"));
                    sink.emit(SubscriptionEvent::error(e)).await;
                    return;
                }
                None => return,
            };

            if !delivered {
                return;
            }
        }
    }

    /// Decode a `data` payload into the target. Returns the event to emit, if any.
    fn apply_data<T: DeserializeOwned>(
        &self,
        operation_id: &str,
        payload: Option<Value>,
        target: &Mutex<T>,
    ) -> Option<SubscriptionEvent> {
        let mut payload = match payload {
            Some(Value::Object(map)) => map,
            other => {
                let message = format!("data frame without data: {}", other.unwrap_or_default());
                self.note(Some(operation_id), &message);
                return None;
            }
        };

        match payload.remove("data") {
            Some(data) if !data.is_null() => match serde_json::from_value::<T>(data) {
                Ok(value) => {
                    *target.lock() = value;
                    Some(SubscriptionEvent::new_data())
                }
                Err(e) => Some(SubscriptionEvent::error(Error::Decode(e.to_string()))),
            },
            _ => {
                let message = match payload.get("errors") {
                    Some(errors) => format!("data frame with errors: {errors}"),
                    None => "data frame without data".to_owned(),
                };
                self.note(Some(operation_id), &message);
                None
            }
        }
    }

    async fn stop(&self, session: Session, operation_id: String) {
        let Session {
            mut write,
            inbound,
            _reader,
        } = session;
        drop(inbound);

        let stop = ClientMessage::Stop {
            id: operation_id.clone(),
        };
        let shutdown = async {
            send_message(&mut write, &stop).await?;
            write.close().await?;
            Ok::<(), Error>(())
        };
        match tokio::time::timeout(STOP_GRACE, shutdown).await {
            Ok(Ok(())) => self.note(Some(&operation_id), "stopped"),
            Ok(Err(e)) => self.note(Some(&operation_id), &format!("stop not delivered: {e}")),
            Err(_) => self.note(Some(&operation_id), "stop timed out"),
        }
    }

    fn note(&self, operation_id: Option<&str>, message: &str) {
        self.inner.log.log(&LogEvent::Subscription {
            operation_id,
            message,
        });
    }
}

/// Handle to a subscription running on a background task.
///
/// Created by [`GraphQLClient::spawn_subscription`]. Dropping the handle
/// cancels the subscription.
pub struct Subscription<T> {
    events: mpsc::Receiver<SubscriptionEvent>,
    cancel: CancellationToken,
    target: Arc<Mutex<T>>,
    state: StateCell,
    task: Option<JoinHandle<Result<()>>>,
}

impl<T> Subscription<T> {
    /// Receive the next event. Returns `None` after the closing event.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Request the subscription to stop. The closing event follows.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    /// The target that decoded payloads are written into.
    pub fn target(&self) -> &Arc<Mutex<T>> {
        &self.target
    }

    /// A copy of the most recently decoded payload.
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.target.lock().clone()
    }

    /// The token that cancels this subscription.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop listening for events and wait for the engine to finish.
    ///
    /// Closing the event receiver stops an active engine right away, the
    /// same as [`stop`](Self::stop).
    pub async fn join(mut self) -> Result<()> {
        self.events.close();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Protocol(format!("subscription task failed: {e}"))),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let data = SubscriptionEvent::new_data();
        assert!(data.has_new_data && !data.closing && data.error.is_none());

        let closing = SubscriptionEvent::closing(Some(Error::Cancelled));
        assert!(closing.closing);
        assert!(matches!(closing.error, Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_emit_stops_after_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink { events: tx, cancel: &cancel };
        assert!(sink.emit(SubscriptionEvent::new_data()).await);

        // channel is full; cancellation must unblock the send
        cancel.cancel();
        assert!(!sink.emit(SubscriptionEvent::new_data()).await);
    }

    #[tokio::test]
    async fn test_close_does_not_block_on_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        tx.send(SubscriptionEvent::new_data()).await.unwrap();

        let sink = EventSink { events: tx, cancel: &cancel };
        tokio::time::timeout(CLOSE_GRACE * 3, sink.close(None))
            .await
            .expect("close must honor its grace period");

        assert!(rx.recv().await.unwrap().has_new_data);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_state_cell() {
        let state = StateCell::default();
        assert_eq!(state.get(), SubscriptionState::Connecting);
        state.set(SubscriptionState::Active);
        assert_eq!(state.clone().get(), SubscriptionState::Active);
    }
}
