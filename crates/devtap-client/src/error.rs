//! Error types for the devtap-client crate.

use serde::Deserialize;
use thiserror::Error;

/// Error object carried by a protocol response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} #{}", self.message, self.code)
    }
}

/// Errors that can occur while talking to a DevTools endpoint.
///
/// `Clone` so a single connection-wide failure can be handed to every
/// outstanding call and event waiter at teardown.
#[derive(Debug, Clone, Error)]
pub enum CdpError {
    /// Failed to establish a WebSocket connection to the endpoint.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Socket-level read or write failure. Terminal for the connection.
    #[error("transport failure: {detail}")]
    Transport { detail: String },

    /// The connection is closed; raised to every pending call and waiter.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered a call with an error object.
    #[error("{0}")]
    Remote(RemoteError),

    /// An inbound payload did not have the expected shape.
    #[error("failed to decode payload: {detail}")]
    Decode { detail: String },

    /// A caller asked for a correlation id that is still outstanding.
    #[error("call id {id} is already pending")]
    DuplicateId { id: u64 },

    /// A category was released more often than it was acquired.
    #[error("domain {category} released without a matching acquire")]
    DomainUnderflow { category: String },

    /// An operation needs a category that nobody has enabled.
    #[error("{category} must be enabled")]
    DomainNotEnabled { category: String },

    /// Script evaluation raised an exception on the remote side.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// Listing debuggable targets failed.
    #[error("target discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CdpError {
    /// The server's error code, if this is a server-reported failure.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            CdpError::Remote(err) => Some(err.code),
            _ => None,
        }
    }

    /// True when the failure ends the whole connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CdpError::Transport { .. } | CdpError::ConnectionClosed)
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        CdpError::Decode {
            detail: err.to_string(),
        }
    }
}

impl From<RemoteError> for CdpError {
    fn from(err: RemoteError) -> Self {
        CdpError::Remote(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_renders_message_and_code() {
        let err = CdpError::from(RemoteError {
            code: -32000,
            message: "nope".into(),
            data: None,
        });
        assert_eq!(err.to_string(), "nope #-32000");
        assert_eq!(err.remote_code(), Some(-32000));
        assert!(!err.is_terminal());
    }

    #[test]
    fn remote_error_data_is_optional() {
        let err: RemoteError =
            serde_json::from_str(r#"{"code": -32601, "message": "Method not found"}"#).unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.data.is_none());
    }

    #[test]
    fn transport_failures_are_terminal() {
        assert!(CdpError::ConnectionClosed.is_terminal());
        assert!(CdpError::Transport {
            detail: "reset".into()
        }
        .is_terminal());
        assert!(!CdpError::decode("bad").is_terminal());
    }
}
