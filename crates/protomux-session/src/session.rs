//! Request correlation and event fan-out for one logical session.
//!
//! A session owns the table of requests waiting for a response. Each entry
//! is inserted by [`Session::send`] and removed exactly once: either when
//! the matching response is dispatched or when the session is disposed.
//!
//! Events are not delivered from inside [`Session::dispatch_message`].
//! They are queued on a FIFO channel drained by a task on the tokio
//! runtime, so listeners run on a later scheduling turn and may send or
//! dispose without re-entering a dispatch in progress.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use protomux_protocol::{FrameKind, InboundFrame, MessageId, RequestEnvelope};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{ProtocolError, SessionError, SessionResult};
use crate::{WRAPPED_TARGET, lock};

/// Delegate a session uses to put a request on the wire.
pub type RawSend = Box<dyn Fn(&RequestEnvelope) + Send + Sync>;

type Completion = oneshot::Sender<Result<Value, ProtocolError>>;

/// Error text for a pending response whose session vanished without
/// completing it.
const DROPPED_SESSION_TEXT: &str = "Session was dropped.";

struct PendingCallback {
    completion: Completion,
    method: String,
    location: &'static Location<'static>,
}

struct SessionState {
    connection: Option<Weak<Connection>>,
    error_text: String,
    callbacks: BTreeMap<MessageId, PendingCallback>,
}

struct QueuedEvent {
    method: String,
    params: Value,
}

/// A logical channel over a shared connection.
pub struct Session {
    session_id: String,
    raw_send: RawSend,
    state: Mutex<SessionState>,
    emitter: Arc<EventEmitter>,
    events: mpsc::UnboundedSender<QueuedEvent>,
    trace_envelopes: bool,
}

impl Session {
    pub(crate) fn new(
        runtime: &Handle,
        connection: Weak<Connection>,
        session_id: impl Into<String>,
        error_text: impl Into<String>,
        raw_send: RawSend,
        trace_envelopes: bool,
    ) -> Arc<Self> {
        let emitter = Arc::new(EventEmitter::new());
        let (events, queue) = mpsc::unbounded_channel();
        runtime.spawn(pump_events(queue, Arc::clone(&emitter)));

        Arc::new(Self {
            session_id: session_id.into(),
            raw_send,
            state: Mutex::new(SessionState {
                connection: Some(connection),
                error_text: error_text.into(),
                callbacks: BTreeMap::new(),
            }),
            emitter,
            events,
            trace_envelopes,
        })
    }

    /// Session id; empty for the root session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Text reported by requests failing after disposal.
    pub fn error_text(&self) -> String {
        lock(&self.state).error_text.clone()
    }

    /// Replaces the text reported by requests failing after disposal.
    pub fn set_error_text(&self, text: impl Into<String>) {
        lock(&self.state).error_text = text.into();
    }

    /// The owning connection, while the session is live.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.state).connection.as_ref().and_then(Weak::upgrade)
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).callbacks.len()
    }

    /// Sends `method` and returns a future for its result.
    ///
    /// The request is on the wire when this returns. The future resolves
    /// with the response's `result`, or fails with a [`ProtocolError`]
    /// when the remote side answers with an error or the session is
    /// disposed first. On a disposed session the future is already failed
    /// and nothing is written.
    ///
    /// Any error carries the location of this call.
    #[track_caller]
    pub fn send(&self, method: impl Into<String>, params: Option<Value>) -> PendingResponse {
        let method = method.into();
        let location = Location::caller();
        let (completion, receiver) = oneshot::channel();

        let envelope = {
            let mut state = lock(&self.state);
            let Some(connection) = state.connection.as_ref().and_then(Weak::upgrade) else {
                let error = ProtocolError::send_after_dispose(location, &method, &state.error_text);
                let _ = completion.send(Err(error));
                return PendingResponse::new(None, method, location, receiver);
            };

            let id = connection.next_message_id();
            state.callbacks.insert(
                id,
                PendingCallback {
                    completion,
                    method: method.clone(),
                    location,
                },
            );
            RequestEnvelope::new(id, method.clone(), params)
        };

        if self.trace_envelopes {
            trace_envelope("SEND ►", &self.session_id, &envelope);
        }
        (self.raw_send)(&envelope);
        PendingResponse::new(Some(envelope.id), method, location, receiver)
    }

    /// True once the session has been disposed.
    pub fn is_disposed(&self) -> bool {
        lock(&self.state).connection.is_none()
    }

    /// Fails every pending request and detaches from the connection.
    ///
    /// Pending requests fail with `Protocol error (<method>): <error text>`
    /// in the order they were sent. Calling this again is harmless.
    pub fn dispose(&self) {
        let (callbacks, error_text) = {
            let mut state = lock(&self.state);
            state.connection = None;
            (std::mem::take(&mut state.callbacks), state.error_text.clone())
        };

        if !callbacks.is_empty() {
            debug!(
                session_id = %self.session_id,
                pending = callbacks.len(),
                "disposing session with pending requests"
            );
        }
        for callback in callbacks.into_values() {
            let error = ProtocolError::disconnected(callback.location, &callback.method, &error_text);
            let _ = callback.completion.send(Err(error));
        }
    }

    /// Routes an inbound frame.
    ///
    /// A response completes its pending request. A response nobody waits
    /// for is accepted only after disposal (it lost the race with
    /// [`dispose`](Self::dispose)); on a live session it is a correlation
    /// bug, which panics in debug builds and is reported as
    /// [`SessionError::UnmatchedResponse`] otherwise. An event is queued
    /// and its listeners run after this call returns.
    pub fn dispatch_message(&self, frame: InboundFrame) -> SessionResult<()> {
        if self.trace_envelopes {
            trace_envelope("◀ RECV", &self.session_id, &frame);
        }

        match frame.into_kind() {
            FrameKind::Response { id, result } => self.complete(id, Ok(result)),
            FrameKind::ErrorResponse { id, error } => self.complete(id, Err(error)),
            FrameKind::Event { method, params } => {
                if self.events.send(QueuedEvent { method, params }).is_err() {
                    warn!(session_id = %self.session_id, "event pump stopped; dropping event");
                }
                Ok(())
            }
            FrameKind::Malformed => {
                warn!(session_id = %self.session_id, "dropping frame with neither id nor method");
                Ok(())
            }
        }
    }

    fn complete(
        &self,
        id: MessageId,
        outcome: Result<Value, protomux_protocol::ResponseError>,
    ) -> SessionResult<()> {
        let (callback, disposed) = {
            let mut state = lock(&self.state);
            (state.callbacks.remove(&id), state.connection.is_none())
        };

        let Some(callback) = callback else {
            debug_assert!(
                disposed,
                "response {id} matches no pending request on live session {:?}",
                self.session_id
            );
            if disposed {
                trace!(id, session_id = %self.session_id, "response arrived after disposal");
                return Ok(());
            }
            return Err(SessionError::unmatched_response(id, self.session_id.clone()));
        };

        let result = outcome.map_err(|error| {
            ProtocolError::from_response(callback.location, &callback.method, &error)
        });
        let _ = callback.completion.send(result);
        Ok(())
    }

    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.emitter.on(event, listener)
    }

    /// Registers a listener for the next `event` only.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.emitter.once(event, listener)
    }

    /// Registers a listener for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.emitter.on_any(listener)
    }

    /// Removes a listener registered for `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter.off(event, id)
    }

    /// Removes a wildcard listener.
    pub fn off_any(&self, id: ListenerId) -> bool {
        self.emitter.off_any(id)
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.emitter.listener_count(event)
    }

    /// The listener registry backing this session.
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("disposed", &state.connection.is_none())
            .field("pending", &state.callbacks.len())
            .finish_non_exhaustive()
    }
}

async fn pump_events(mut queue: mpsc::UnboundedReceiver<QueuedEvent>, emitter: Arc<EventEmitter>) {
    while let Some(event) = queue.recv().await {
        emitter.emit(&event.method, &event.params);
    }
}

fn trace_envelope<T: serde::Serialize>(direction: &str, session_id: &str, envelope: &T) {
    match serde_json::to_string_pretty(envelope) {
        Ok(text) => debug!(target: WRAPPED_TARGET, session_id, "{direction} {text}"),
        Err(error) => debug!(target: WRAPPED_TARGET, session_id, %error, "{direction} <unprintable>"),
    }
}

/// Future for the result of [`Session::send`].
///
/// Dropping it does not cancel the request: its entry stays pending until
/// the response arrives or the session is disposed.
#[must_use = "the request is sent either way; await this to observe its result"]
pub struct PendingResponse {
    id: Option<MessageId>,
    method: String,
    location: &'static Location<'static>,
    receiver: oneshot::Receiver<Result<Value, ProtocolError>>,
}

impl PendingResponse {
    fn new(
        id: Option<MessageId>,
        method: String,
        location: &'static Location<'static>,
        receiver: oneshot::Receiver<Result<Value, ProtocolError>>,
    ) -> Self {
        Self {
            id,
            method,
            location,
            receiver,
        }
    }

    /// Id assigned to the request; `None` if it was never sent.
    pub fn id(&self) -> Option<MessageId> {
        self.id
    }

    /// Method of the request.
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, ProtocolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProtocolError::disconnected(
                this.location,
                &this.method,
                DROPPED_SESSION_TEXT,
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}
