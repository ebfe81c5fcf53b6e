//! Transport seam and an in-process implementation.
//!
//! A transport moves serialized frames; it knows nothing about ids,
//! sessions or events. The connection installs its callbacks at
//! construction and detaches them when it closes.

use std::sync::{Arc, Mutex};

use protomux_protocol::RequestEnvelope;
use serde_json::Value;
use tracing::{debug, warn};

use crate::lock;

/// Callback invoked with each inbound frame.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked once the transport has closed.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Bidirectional frame transport.
///
/// Implementations must not hold internal locks while invoking the
/// installed handlers: the connection calls back into the transport from
/// inside them (to detach handlers, or to send).
pub trait Transport: Send + Sync {
    /// Writes one serialized frame.
    fn send(&self, frame: &str);

    /// Closes the underlying channel.
    fn close(&self);

    /// Installs or detaches the inbound frame handler.
    fn set_on_message(&self, handler: Option<MessageHandler>);

    /// Installs or detaches the closure handler.
    fn set_on_close(&self, handler: Option<CloseHandler>);
}

#[derive(Default)]
struct MemoryState {
    sent: Vec<String>,
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
    closed: bool,
    close_calls: usize,
}

/// Transport that keeps frames in memory.
///
/// Outbound frames are recorded; the owner plays the remote side by
/// injecting inbound frames with [`deliver`](Self::deliver) and simulating
/// remote closure with [`disconnect`](Self::disconnect).
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    /// Creates a new in-memory transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hands an inbound frame to the installed message handler.
    ///
    /// Returns false if no handler is attached.
    pub fn deliver(&self, frame: &str) -> bool {
        let handler = lock(&self.state).on_message.clone();
        match handler {
            Some(handler) => {
                handler(frame);
                true
            }
            None => {
                debug!(frame, "no message handler attached; dropping frame");
                false
            }
        }
    }

    /// Serializes `value` and delivers it.
    pub fn deliver_value(&self, value: &Value) -> bool {
        self.deliver(&value.to_string())
    }

    /// Simulates the remote side going away.
    pub fn disconnect(&self) {
        let handler = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.on_close.clone()
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Frames written so far.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// Frames written so far, parsed as request envelopes.
    ///
    /// Frames that do not parse are skipped.
    pub fn sent_requests(&self) -> Vec<RequestEnvelope> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// The most recently written request, if any.
    pub fn last_request(&self) -> Option<RequestEnvelope> {
        self.sent_requests().pop()
    }

    /// Whether the transport has been closed from either side.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of [`Transport::close`] calls received.
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    /// Whether message and close handlers are installed.
    pub fn handlers_attached(&self) -> (bool, bool) {
        let state = lock(&self.state);
        (state.on_message.is_some(), state.on_close.is_some())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &str) {
        let mut state = lock(&self.state);
        if state.closed {
            warn!(frame, "send on closed memory transport");
            return;
        }
        state.sent.push(frame.to_string());
    }

    fn close(&self) {
        let handler = {
            let mut state = lock(&self.state);
            state.close_calls += 1;
            state.closed = true;
            state.on_close.clone()
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    fn set_on_message(&self, handler: Option<MessageHandler>) {
        lock(&self.state).on_message = handler;
    }

    fn set_on_close(&self, handler: Option<CloseHandler>) {
        lock(&self.state).on_close = handler;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn records_sent_frames() {
        let transport = MemoryTransport::new();
        transport.send(r#"{"id":1,"method":"A.b"}"#);
        transport.send("not json");

        assert_eq!(transport.sent().len(), 2);
        let requests = transport.sent_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "A.b");
    }

    #[test]
    fn deliver_without_handler() {
        let transport = MemoryTransport::new();
        assert!(!transport.deliver("{}"));
    }

    #[test]
    fn deliver_invokes_handler() {
        let transport = MemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.set_on_message(Some(Arc::new(move |frame: &str| {
            sink.lock().unwrap().push(frame.to_string());
        })));

        assert!(transport.deliver(r#"{"method":"X.y"}"#));
        assert_eq!(*seen.lock().unwrap(), vec![r#"{"method":"X.y"}"#.to_string()]);
    }

    #[test]
    fn close_fires_handler_and_drops_later_sends() {
        let transport = MemoryTransport::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        transport.set_on_close(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        transport.close();
        transport.send("late");

        assert!(transport.is_closed());
        assert_eq!(transport.close_calls(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn handler_may_detach_itself() {
        let transport = MemoryTransport::new();
        let inner = Arc::clone(&transport);
        transport.set_on_close(Some(Arc::new(move || {
            inner.set_on_close(None);
            inner.set_on_message(None);
        })));

        transport.disconnect();
        assert_eq!(transport.handlers_attached(), (false, false));
    }
}
