//! Connection and session multiplexing over a frame transport.
//!
//! A [`Connection`] owns one [`Transport`] and the message id space. It
//! routes inbound frames to its root [`Session`], which matches responses
//! to the requests that produced them and hands events to listeners.
//!
//! - Outbound: [`Session::send`] allocates an id from the connection,
//!   records a pending entry and writes the request through the transport.
//! - Inbound: the transport's message callback reaches the connection,
//!   which drops close acknowledgements, wraps page proxy traffic into a
//!   single synthetic event and forwards the rest to the root session.
//! - Teardown: transport closure or [`Connection::dispose`] disposes every
//!   session, failing all pending requests, then notifies the owner once.
//!
//! # Example
//!
//! ```rust,no_run
//! use protomux_session::{Connection, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = MemoryTransport::new();
//!     let connection = Connection::new(transport.clone(), || println!("disconnected"))?;
//!
//!     let session = connection.browser_session();
//!     session.on("Browser.pageProxyCreated", |params| println!("{params}"));
//!     let version = session.send("Browser.getVersion", None);
//!
//!     // The remote side answers through the transport.
//!     transport.deliver(r#"{"id":1,"result":{"product":"WebKit"}}"#);
//!     println!("{}", version.await?);
//!
//!     connection.dispose();
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod config;
mod connection;
mod emitter;
mod error;
mod session;
mod transport;

pub use config::{ConnectionConfig, DEFAULT_BROWSER_ERROR_TEXT};
pub use connection::Connection;
pub use emitter::{AnyListener, EventEmitter, Listener, ListenerId};
pub use error::{
    ProtocolError, ProtocolErrorKind, SWAPPED_OUT_MESSAGE, SessionError, SessionResult,
    is_swapped_out_error,
};
pub use session::{PendingResponse, RawSend, Session};
pub use transport::{CloseHandler, MemoryTransport, MessageHandler, Transport};

pub use protomux_protocol::{
    BROWSER_CLOSE_MESSAGE_ID, InboundFrame, MessageId, PAGE_PROXY_MESSAGE_RECEIVED,
    PageProxyMessageReceivedPayload, RequestEnvelope, ResponseError,
};

pub(crate) use protomux_core::tracing::{PROTOCOL_TARGET, WRAPPED_TARGET};

/// Locks `mutex`, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
