//! Wire envelopes and inbound frame classification for protomux.
//!
//! Every unit on the wire is a JSON object. Outbound, the connection only
//! ever writes requests:
//!
//! ```text
//! {"id": 7, "method": "Page.navigate", "params": {...}}
//! ```
//!
//! Inbound, a frame is one of:
//! - a response `{"id": 7, "result": {...}}`
//! - an error response `{"id": 7, "error": {"message": "...", "data": ...}}`
//! - an event `{"method": "Page.loadEventFired", "params": {...}}`
//! - a close acknowledgement carrying [`BROWSER_CLOSE_MESSAGE_ID`]
//! - a frame addressed to a page proxy (carries `pageProxyId`)
//!
//! [`Inbound::classify`] sorts a parsed frame into these shapes.
//!
//! # Example
//!
//! ```rust
//! use protomux_protocol::{decode_frame, Inbound};
//!
//! let value = decode_frame(r#"{"id":-9999,"result":{}}"#).unwrap();
//! assert!(matches!(Inbound::classify(value).unwrap(), Inbound::CloseAck(-9999)));
//! ```

mod codec;
mod error;
mod types;

pub use codec::{decode_frame, encode_frame};
pub use error::{CodecError, CodecResult};
pub use types::{
    FrameKind, Inbound, InboundFrame, MessageId, PageProxyMessageReceivedPayload,
    RequestEnvelope, ResponseError,
};

/// Reserved id the browser server uses for its own `Browser.close` command.
///
/// Responses carrying it are acknowledgements to be dropped, never matched
/// against pending requests.
pub const BROWSER_CLOSE_MESSAGE_ID: MessageId = -9999;

/// Synthetic event name for frames addressed to a page proxy.
///
/// Proxy traffic is repackaged under this name so it shares one channel with
/// `Browser.pageProxyCreated` and `Browser.pageProxyDestroyed`.
pub const PAGE_PROXY_MESSAGE_RECEIVED: &str = "kPageProxyMessageReceived";

/// Maximum frame size (256 MiB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;
