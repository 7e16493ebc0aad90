//! Error types.
//!
//! [`HttpError`] is the closed set of engine errors plus handler-thrown
//! errors that carry their own status. Engine errors are immutable
//! singletons: fixed message, mapped status. Propagation is by value and
//! errors are cheap to clone so memoized outcomes can hand the same error
//! to repeated callers.

use std::borrow::Cow;
use std::fmt;

use crate::status::is_known_status;

/// The closed set of error tags the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request body exceeded the configured limit.
    BodyTooLarge,
    /// The transport signalled an abort before completion.
    Aborted,
    /// Body bytes did not match the declared content-length.
    SizeMismatch,
    /// Body could not be parsed as JSON.
    InvalidJson,
    /// Unclassified internal failure.
    ServerError,
    /// Handler-thrown error carrying its own status.
    Handler,
}

/// An error value with a message and a mapped HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: ErrorKind,
    status: u16,
    message: Cow<'static, str>,
}

impl HttpError {
    /// `413 Request body too large`
    #[must_use]
    pub const fn body_too_large() -> Self {
        Self {
            kind: ErrorKind::BodyTooLarge,
            status: 413,
            message: Cow::Borrowed("Request body too large"),
        }
    }

    /// `418 Request aborted`
    #[must_use]
    pub const fn aborted() -> Self {
        Self {
            kind: ErrorKind::Aborted,
            status: 418,
            message: Cow::Borrowed("Request aborted"),
        }
    }

    /// `400 Request body size mismatch`
    #[must_use]
    pub const fn size_mismatch() -> Self {
        Self {
            kind: ErrorKind::SizeMismatch,
            status: 400,
            message: Cow::Borrowed("Request body size mismatch"),
        }
    }

    /// `400 Invalid JSON`
    #[must_use]
    pub const fn invalid_json() -> Self {
        Self {
            kind: ErrorKind::InvalidJson,
            status: 400,
            message: Cow::Borrowed("Invalid JSON"),
        }
    }

    /// `500 Internal Server Error`
    #[must_use]
    pub const fn server_error() -> Self {
        Self {
            kind: ErrorKind::ServerError,
            status: 500,
            message: Cow::Borrowed("Internal Server Error"),
        }
    }

    /// A handler-thrown error with its own status and message.
    #[must_use]
    pub fn custom(status: u16, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: ErrorKind::Handler,
            status,
            message: message.into(),
        }
    }

    /// The error tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The status carried by the error, before table mapping.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The message carried by the error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The status this error produces on the wire.
    ///
    /// Errors whose status is outside the canonical table surface as 500.
    #[must_use]
    pub fn response_status(&self) -> u16 {
        if is_known_status(self.status) {
            self.status
        } else {
            500
        }
    }

    /// The body this error produces on the wire.
    ///
    /// Follows [`response_status`](Self::response_status): an out-of-table
    /// status collapses the whole response to `500 Internal Server Error`.
    #[must_use]
    pub fn response_message(&self) -> &str {
        if is_known_status(self.status) {
            &self.message
        } else {
            "Internal Server Error"
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for HttpError {}

impl From<serde_json::Error> for HttpError {
    fn from(_: serde_json::Error) -> Self {
        Self::invalid_json()
    }
}

/// Server option validation failure, surfaced at listen time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Port outside [1, 65535].
    InvalidPort(u32),
    /// Body limit outside [1, 64] MiB.
    InvalidBodySize(u32),
    /// Neither `routes` nor `router` supplied.
    NoRoutes,
    /// Both `routes` and `router` supplied.
    ConflictingRouters,
    /// Route path does not begin with `/`.
    InvalidPath(String),
    /// WebSocket idle timeout below the 5 second minimum.
    WsIdleTimeoutTooSmall(u32),
    /// Listen failed at the transport layer.
    ListenFailed(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort(port) => write!(f, "port {port} outside [1, 65535]"),
            Self::InvalidBodySize(mib) => write!(f, "max body size {mib} MiB outside [1, 64]"),
            Self::NoRoutes => write!(f, "either routes or a universal router is required"),
            Self::ConflictingRouters => {
                write!(f, "routes and a universal router are mutually exclusive")
            }
            Self::InvalidPath(path) => write!(f, "route path {path:?} must begin with '/'"),
            Self::WsIdleTimeoutTooSmall(secs) => {
                write!(f, "websocket idle timeout {secs}s below 5s minimum")
            }
            Self::ListenFailed(port) => write!(f, "failed to listen on port {port}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_messages_and_statuses() {
        assert_eq!(HttpError::body_too_large().status(), 413);
        assert_eq!(HttpError::body_too_large().message(), "Request body too large");
        assert_eq!(HttpError::aborted().status(), 418);
        assert_eq!(HttpError::aborted().message(), "Request aborted");
        assert_eq!(HttpError::size_mismatch().status(), 400);
        assert_eq!(
            HttpError::size_mismatch().message(),
            "Request body size mismatch"
        );
        assert_eq!(HttpError::invalid_json().status(), 400);
        assert_eq!(HttpError::invalid_json().message(), "Invalid JSON");
        assert_eq!(HttpError::server_error().status(), 500);
        assert_eq!(HttpError::server_error().message(), "Internal Server Error");
    }

    #[test]
    fn custom_error_with_known_status_passes_through() {
        let err = HttpError::custom(422, "bad shape");
        assert_eq!(err.response_status(), 422);
        assert_eq!(err.response_message(), "bad shape");
    }

    #[test]
    fn custom_error_with_unknown_status_collapses_to_500() {
        let err = HttpError::custom(299, "weird");
        assert_eq!(err.response_status(), 500);
        assert_eq!(err.response_message(), "Internal Server Error");
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::InvalidPort(0).to_string(),
            "port 0 outside [1, 65535]"
        );
        assert!(ConfigError::InvalidPath("users".into())
            .to_string()
            .contains("must begin with '/'"));
    }
}
