//! Connection: owner of the transport and of the message id space.
//!
//! The connection turns transport callbacks into session calls:
//!
//! ```text
//! Transport ──on_message──► Connection ──dispatch_message──► root Session
//!     ▲                        │
//!     └────── send ◄── raw_send ◄── Session::send
//! ```
//!
//! Inbound frames are classified before routing. Close acknowledgements
//! are dropped, frames addressed to a page proxy become a single
//! synthetic [`PAGE_PROXY_MESSAGE_RECEIVED`] event, everything else goes
//! to the root session as-is.
//!
//! [`PAGE_PROXY_MESSAGE_RECEIVED`]: protomux_protocol::PAGE_PROXY_MESSAGE_RECEIVED

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use protomux_protocol::{Inbound, MessageId, RequestEnvelope, decode_frame, encode_frame};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace};

use crate::config::ConnectionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::{RawSend, Session};
use crate::transport::{CloseHandler, MessageHandler, Transport};
use crate::{PROTOCOL_TARGET, lock};

type DisconnectHandler = Box<dyn FnOnce() + Send>;

/// A connection to a browser over one transport.
pub struct Connection {
    last_id: AtomicI64,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    runtime: Handle,
    config: ConnectionConfig,
    browser_session: Arc<Session>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl Connection {
    /// Creates a connection with the default configuration.
    ///
    /// `on_disconnect` runs once, after the transport closes or the
    /// connection is disposed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRuntime`] when called outside a tokio
    /// runtime.
    pub fn new<F>(transport: Arc<dyn Transport>, on_disconnect: F) -> SessionResult<Arc<Self>>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_config(transport, on_disconnect, ConnectionConfig::default())
    }

    /// Creates a connection with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRuntime`] when called outside a tokio
    /// runtime.
    pub fn with_config<F>(
        transport: Arc<dyn Transport>,
        on_disconnect: F,
        config: ConnectionConfig,
    ) -> SessionResult<Arc<Self>>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let on_disconnect: DisconnectHandler = Box::new(on_disconnect);

        let connection = Arc::new_cyclic(|weak: &Weak<Connection>| {
            let browser_session = Session::new(
                &runtime,
                weak.clone(),
                "",
                config.browser_error_text.clone(),
                forward_to(weak.clone()),
                config.trace_envelopes,
            );
            let mut sessions = HashMap::new();
            sessions.insert(String::new(), Arc::clone(&browser_session));

            Self {
                last_id: AtomicI64::new(0),
                transport: Arc::clone(&transport),
                closed: AtomicBool::new(false),
                on_disconnect: Mutex::new(Some(on_disconnect)),
                runtime: runtime.clone(),
                config,
                browser_session,
                sessions: Mutex::new(sessions),
            }
        });

        let weak = Arc::downgrade(&connection);
        let on_message: MessageHandler = Arc::new(move |frame: &str| {
            if let Some(connection) = weak.upgrade() {
                connection.on_message(frame);
            }
        });
        let weak = Arc::downgrade(&connection);
        let on_close: CloseHandler = Arc::new(move || {
            if let Some(connection) = weak.upgrade() {
                connection.handle_close();
            }
        });
        transport.set_on_message(Some(on_message));
        transport.set_on_close(Some(on_close));

        debug!("connection established");
        Ok(connection)
    }

    /// The root session, addressed by the empty session id.
    pub fn browser_session(&self) -> Arc<Session> {
        Arc::clone(&self.browser_session)
    }

    /// Returns a fresh message id.
    ///
    /// Ids start at 1, strictly increase and are never reused.
    pub fn next_message_id(&self) -> MessageId {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Serializes `envelope` and writes it to the transport.
    ///
    /// No validation of the envelope takes place. A frame that cannot be
    /// encoded is logged and dropped; its request stays pending.
    pub fn raw_send(&self, envelope: &RequestEnvelope) {
        match encode_frame(envelope) {
            Ok(frame) => {
                debug!(target: PROTOCOL_TARGET, "SEND ► {frame}");
                self.transport.send(&frame);
            }
            Err(error) => {
                error!(
                    id = envelope.id,
                    method = %envelope.method,
                    %error,
                    "failed to encode request; dropping it"
                );
            }
        }
    }

    fn on_message(&self, frame: &str) {
        debug!(target: PROTOCOL_TARGET, "◀ RECV {frame}");

        let value = match decode_frame(frame) {
            Ok(value) => value,
            Err(error) => {
                error!(%error, "dropping undecodable frame");
                return;
            }
        };

        let frame = match Inbound::classify(value) {
            Ok(Inbound::CloseAck(id)) => {
                trace!(id, "ignoring close acknowledgement");
                return;
            }
            Ok(Inbound::PageProxy(payload)) => {
                trace!(page_proxy_id = %payload.page_proxy_id, "wrapping page proxy frame");
                payload.into_event_frame()
            }
            Ok(Inbound::Frame(frame)) => frame,
            Err(error) => {
                error!(%error, "dropping frame with unexpected shape");
                return;
            }
        };

        if let Err(error) = self.browser_session.dispatch_message(frame) {
            error!(%error, "request correlation broken");
        }
    }

    /// Handles closure of the transport.
    ///
    /// The first call detaches the transport callbacks, disposes every
    /// session and runs the disconnect callback; later calls do nothing.
    pub fn handle_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.transport.set_on_message(None);
        self.transport.set_on_close(None);

        let sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();
        for session in sessions {
            session.dispose();
        }

        info!(last_id = self.last_id.load(Ordering::SeqCst), "connection closed");
        let on_disconnect = lock(&self.on_disconnect).take();
        if let Some(on_disconnect) = on_disconnect {
            on_disconnect();
        }
    }

    /// Tears the connection down and closes the transport.
    pub fn dispose(&self) {
        self.handle_close();
        self.transport.close();
    }

    /// True once the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Registers an additional session sharing this connection's id space.
    ///
    /// Requests sent on it go through `raw_send`, which typically wraps
    /// them for a target and calls [`Connection::raw_send`]. Inbound frames
    /// are not routed to it automatically; the owner feeds it with
    /// [`Session::dispatch_message`], usually from
    /// [`PAGE_PROXY_MESSAGE_RECEIVED`](protomux_protocol::PAGE_PROXY_MESSAGE_RECEIVED)
    /// events. It is disposed with the connection.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or `session_id` is taken.
    pub fn create_session(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        error_text: impl Into<String>,
        raw_send: RawSend,
    ) -> SessionResult<Arc<Session>> {
        let session_id = session_id.into();
        let mut sessions = lock(&self.sessions);
        if self.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        if sessions.contains_key(&session_id) {
            return Err(SessionError::duplicate_session(session_id));
        }

        let session = Session::new(
            &self.runtime,
            Arc::downgrade(self),
            session_id.clone(),
            error_text,
            raw_send,
            self.config.trace_envelopes,
        );
        sessions.insert(session_id.clone(), Arc::clone(&session));
        debug!(session_id = %session_id, "session created");
        Ok(session)
    }

    /// Looks up a session by id; the root session has the empty id.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Unregisters and disposes a session. The root session stays.
    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        if session_id.is_empty() {
            return None;
        }
        let session = lock(&self.sessions).remove(session_id)?;
        session.dispose();
        debug!(session_id, "session removed");
        Some(session)
    }

    /// Configuration the connection was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("last_id", &self.last_id.load(Ordering::SeqCst))
            .field("closed", &self.is_closed())
            .field("sessions", &lock(&self.sessions).len())
            .finish_non_exhaustive()
    }
}

/// Raw-send delegate that writes through the connection while it exists.
fn forward_to(connection: Weak<Connection>) -> RawSend {
    Box::new(move |envelope: &RequestEnvelope| {
        if let Some(connection) = connection.upgrade() {
            connection.raw_send(envelope);
        }
    })
}
