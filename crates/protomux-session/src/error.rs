//! Session and protocol error types.

use std::panic::Location;

use protomux_protocol::{MessageId, ResponseError};
use thiserror::Error;

/// Result type for session and connection operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Substring identifying a request that raced with a target swap.
pub const SWAPPED_OUT_MESSAGE: &str = "Target was swapped out.";

/// Errors raised by the connection and session machinery itself.
///
/// Failures of individual requests never use this type; they are delivered
/// through [`PendingResponse`](crate::PendingResponse) as [`ProtocolError`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// A response arrived for an id that a live session never registered.
    ///
    /// This means request correlation is broken (a duplicate id or a lost
    /// registration). Other pending requests are left untouched.
    #[error("response {id} matches no pending request on live session {session_id:?}")]
    UnmatchedResponse { id: MessageId, session_id: String },

    /// Construction happened outside a tokio runtime.
    #[error("no tokio runtime available to deliver session events")]
    NoRuntime,

    /// The connection has already been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A session with this id is already registered.
    #[error("session {session_id:?} already exists")]
    DuplicateSession { session_id: String },
}

impl SessionError {
    /// Creates an unmatched response error.
    pub fn unmatched_response(id: MessageId, session_id: impl Into<String>) -> Self {
        Self::UnmatchedResponse {
            id,
            session_id: session_id.into(),
        }
    }

    /// Creates a duplicate session error.
    pub fn duplicate_session(session_id: impl Into<String>) -> Self {
        Self::DuplicateSession {
            session_id: session_id.into(),
        }
    }
}

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The remote side answered with an error payload.
    ErrorResponse,
    /// The session was disposed while the request was pending.
    Disposed,
    /// The request was issued on an already disposed session.
    SendAfterDispose,
}

/// Failure of a single request.
///
/// Carries the call site of the [`Session::send`](crate::Session::send)
/// that issued the request, so a failure reported much later still points
/// at the code that made the call.
#[derive(Debug, Clone, Error)]
#[error("Protocol error ({method}): {message}")]
pub struct ProtocolError {
    method: String,
    message: String,
    kind: ProtocolErrorKind,
    location: &'static Location<'static>,
}

impl ProtocolError {
    /// Builds the error for an error response to `method`.
    pub fn from_response(
        location: &'static Location<'static>,
        method: &str,
        error: &ResponseError,
    ) -> Self {
        Self {
            method: method.to_string(),
            message: error.describe(),
            kind: ProtocolErrorKind::ErrorResponse,
            location,
        }
    }

    /// Builds the error for a request rejected because its session went away.
    pub fn disconnected(
        location: &'static Location<'static>,
        method: &str,
        error_text: &str,
    ) -> Self {
        Self {
            method: method.to_string(),
            message: error_text.to_string(),
            kind: ProtocolErrorKind::Disposed,
            location,
        }
    }

    pub(crate) fn send_after_dispose(
        location: &'static Location<'static>,
        method: &str,
        error_text: &str,
    ) -> Self {
        Self {
            kind: ProtocolErrorKind::SendAfterDispose,
            ..Self::disconnected(location, method, error_text)
        }
    }

    /// Method of the failed request.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Message without the `Protocol error (<method>):` prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure category.
    pub fn kind(&self) -> ProtocolErrorKind {
        self.kind
    }

    /// Where the failed request was issued.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Shorthand for [`is_swapped_out_error`].
    pub fn is_swapped_out(&self) -> bool {
        self.message.contains(SWAPPED_OUT_MESSAGE)
    }
}

/// Returns true if `error` reports a request that raced with a target swap.
pub fn is_swapped_out_error(error: &(dyn std::error::Error + 'static)) -> bool {
    error.to_string().contains(SWAPPED_OUT_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_error_message() {
        let err = ProtocolError::from_response(
            Location::caller(),
            "Page.navigate",
            &ResponseError::new("boom"),
        );
        insta::assert_snapshot!(err.to_string(), @"Protocol error (Page.navigate): boom");
        assert_eq!(err.kind(), ProtocolErrorKind::ErrorResponse);
        assert_eq!(err.method(), "Page.navigate");
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn response_error_message_with_data() {
        let err = ProtocolError::from_response(
            Location::caller(),
            "Runtime.evaluate",
            &ResponseError::new("Invalid").with_data(json!("expression")),
        );
        insta::assert_snapshot!(err.to_string(), @"Protocol error (Runtime.evaluate): Invalid expression");
    }

    #[test]
    fn disconnected_message() {
        let err = ProtocolError::disconnected(
            Location::caller(),
            "Target.close",
            "Browser has been closed.",
        );
        assert_eq!(
            err.to_string(),
            "Protocol error (Target.close): Browser has been closed."
        );
        assert_eq!(err.kind(), ProtocolErrorKind::Disposed);

        let err = ProtocolError::send_after_dispose(Location::caller(), "Target.close", "gone");
        assert_eq!(err.to_string(), "Protocol error (Target.close): gone");
        assert_eq!(err.kind(), ProtocolErrorKind::SendAfterDispose);
    }

    #[test]
    fn location_points_at_caller() {
        let here = Location::caller();
        let err = ProtocolError::disconnected(here, "A.b", "x");
        assert_eq!(err.location().file(), file!());
    }

    #[test]
    fn swapped_out_predicate() {
        let swapped = ProtocolError::from_response(
            Location::caller(),
            "Page.evaluate",
            &ResponseError::new("Target was swapped out."),
        );
        assert!(swapped.is_swapped_out());
        assert!(is_swapped_out_error(&swapped));

        let other = ProtocolError::disconnected(Location::caller(), "Page.evaluate", "closed");
        assert!(!other.is_swapped_out());
        assert!(!is_swapped_out_error(&other));

        let io = std::io::Error::other("Target was swapped out. retry");
        assert!(is_swapped_out_error(&io));
    }

    #[test]
    fn session_error_display() {
        let err = SessionError::unmatched_response(5, "");
        assert_eq!(
            err.to_string(),
            r#"response 5 matches no pending request on live session """#
        );
    }
}
