//! Error taxonomy shared by both ends of the plugin channel.
//!
//! Three layers, kept deliberately distinct:
//!
//! - [`RpcError`] — a *business* failure. Travels inside a response body and
//!   never tears down the channel.
//! - [`ChannelError`] — a *transport* failure (broken pipe, timeout). The
//!   host marks the client disconnected and scores it.
//! - [`HandshakeError`] — first-contact validation failure. Fails closed:
//!   the child is killed before any method is dispatched.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known [`RpcError`] codes.
///
/// Negative codes follow the JSON-RPC reservations; positive codes are
/// runtime-specific business failures.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;

    /// `execute` named an action the plugin does not register.
    pub const UNKNOWN_ACTION: i64 = 1001;
    /// The plugin rejected its configuration during `init`.
    pub const INIT_FAILED: i64 = 1002;
    /// An action handler failed.
    pub const EXECUTE_FAILED: i64 = 1003;
}

// =============================================================================
// RpcError
// =============================================================================

/// Structured failure carried inside a response body.
///
/// Business-level failures surface as an `RpcError` so the channel itself
/// stays healthy; a subsequent ping on the same channel must succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches an opaque detail payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The error returned on an action-registry miss. The message
    /// enumerates the currently registered names to aid debugging and
    /// introspection.
    pub fn unknown_action(action: &str, registered: &[String]) -> Self {
        Self::new(
            codes::UNKNOWN_ACTION,
            format!(
                "unknown action \"{action}\" (registered actions: {})",
                registered.join(", ")
            ),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Transport-level failure on the plugin channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The peer closed the pipe or the process exited.
    #[error("channel closed")]
    Closed,

    /// The call did not complete within the configured deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// I/O error on the underlying pipe.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

// =============================================================================
// HandshakeError
// =============================================================================

/// First-contact validation failure.
///
/// This is the single defence against a binary in the plugin directory that
/// is not a real plugin: any mismatch aborts the child before a method is
/// dispatched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    #[error("magic cookie environment variable '{key}' is not set")]
    MissingCookie { key: &'static str },

    #[error("magic cookie mismatch")]
    CookieMismatch,

    #[error("protocol version mismatch: host speaks {expected}, plugin sent {got}")]
    ProtocolMismatch { expected: u32, got: u32 },

    /// The first line the child produced was not a greeting at all.
    #[error("malformed greeting: {0}")]
    Malformed(String),

    #[error("channel closed before greeting")]
    ChannelClosed,

    #[error("no greeting within {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_message_enumerates_names() {
        let err = RpcError::unknown_action(
            "no-such-action",
            &["send".to_string(), "send.batch".to_string()],
        );
        assert_eq!(err.code, codes::UNKNOWN_ACTION);
        assert!(err.message.contains("unknown action"));
        assert!(err.message.contains("send"));
        assert!(err.message.contains("send.batch"));
    }

    #[test]
    fn rpc_error_round_trips_with_data() {
        let err = RpcError::new(7, "boom").with_data(serde_json::json!({"hint": "retry"}));
        let round: RpcError = serde_json::from_str(&serde_json::to_string(&err).unwrap()).unwrap();
        assert_eq!(round, err);
    }

    #[test]
    fn io_errors_convert_to_channel_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err: ChannelError = io.into();
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
