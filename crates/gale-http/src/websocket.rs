//! Per-connection WebSocket context and upgrade types.
//!
//! [`WsContext`] is a thin, pooled adapter over the transport's socket
//! handle: send, close, topic membership, and publish fan-out through the
//! owning server. A live socket maps to its context through the dedicated
//! slot in [`WsUserData`](crate::transport::WsUserData).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use gale_core::{Deferred, HttpError, Pool, Recycle};

use crate::context::ParamKey;
use crate::server::ServerState;
use crate::transport::{RequestHandle, Transport, WebSocketHandle};

/// A WebSocket frame payload, text or binary.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

impl WsMessage {
    /// Builds a message from a raw frame.
    #[must_use]
    pub fn from_frame(data: &[u8], binary: bool) -> Self {
        if binary {
            Self::Binary(Bytes::copy_from_slice(data))
        } else {
            Self::Text(String::from_utf8_lossy(data).into_owned())
        }
    }

    /// Whether this message travels as a binary frame.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// The payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<&str> for WsMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for WsMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for WsMessage {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// Misuse of a WebSocket context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsError {
    /// The context was used after release; the socket handle is gone.
    Detached,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => write!(f, "websocket context used after release"),
        }
    }
}

impl std::error::Error for WsError {}

/// The pooled per-connection WebSocket context.
pub struct WsContext<T: Transport> {
    server: RefCell<Weak<ServerState<T>>>,
    ws: RefCell<Option<T::WebSocket>>,
    data: RefCell<Option<Rc<dyn Any>>>,
    #[allow(dead_code)] // release goes through the server, kept for parity
    pool: Weak<Pool<Self>>,
}

impl<T: Transport> WsContext<T> {
    /// Builds a fresh context owned by `pool`. Used as the pool factory.
    pub fn with_pool(pool: &Rc<Pool<Self>>) -> Rc<Self> {
        Rc::new(Self {
            server: RefCell::new(Weak::new()),
            ws: RefCell::new(None),
            data: RefCell::new(None),
            pool: Rc::downgrade(pool),
        })
    }

    pub(crate) fn reset(
        &self,
        ws: T::WebSocket,
        server: Weak<ServerState<T>>,
        data: Option<Rc<dyn Any>>,
    ) {
        *self.ws.borrow_mut() = Some(ws);
        *self.server.borrow_mut() = server;
        *self.data.borrow_mut() = data;
    }

    /// The user data returned from the upgrade hook, if any.
    #[must_use]
    pub fn data(&self) -> Option<Rc<dyn Any>> {
        self.data.borrow().clone()
    }

    /// Sends a message; the frame type follows the message shape.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn send(&self, message: impl Into<WsMessage>) -> Result<bool, WsError> {
        let message = message.into();
        self.send_with(message.as_bytes(), message.is_binary())
    }

    /// Sends raw bytes with an explicit frame type.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn send_with(&self, data: &[u8], binary: bool) -> Result<bool, WsError> {
        let mut ws = self.socket()?;
        Ok(ws.send(data, binary))
    }

    /// Closes the socket.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn end(&self, code: u16, reason: &str) -> Result<(), WsError> {
        let mut ws = self.socket()?;
        ws.end(code, reason);
        Ok(())
    }

    /// Subscribes this socket to a topic.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn subscribe(&self, topic: &str) -> Result<bool, WsError> {
        let mut ws = self.socket()?;
        Ok(ws.subscribe(topic))
    }

    /// Unsubscribes this socket from a topic.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn unsubscribe(&self, topic: &str) -> Result<bool, WsError> {
        let mut ws = self.socket()?;
        Ok(ws.unsubscribe(topic))
    }

    // Clones the handle out of the cell: transport calls can fire hooks
    // that re-enter this context synchronously.
    fn socket(&self) -> Result<T::WebSocket, WsError> {
        self.ws.borrow().as_ref().cloned().ok_or(WsError::Detached)
    }

    /// Publishes through the owning server's fan-out.
    ///
    /// # Errors
    ///
    /// [`WsError::Detached`] after release.
    pub fn publish(&self, topic: &str, message: impl Into<WsMessage>) -> Result<bool, WsError> {
        if self.ws.borrow().is_none() {
            return Err(WsError::Detached);
        }
        let server = self.server.borrow().upgrade();
        match server {
            Some(server) => Ok(ServerState::publish(&server, topic, &message.into())),
            None => Ok(false),
        }
    }
}

impl<T: Transport> Recycle for WsContext<T> {
    fn clear(&self) {
        *self.ws.borrow_mut() = None;
        *self.server.borrow_mut() = Weak::new();
        *self.data.borrow_mut() = None;
    }
}

// ----------------------------------------------------------------------
// Upgrade
// ----------------------------------------------------------------------

/// Request metadata handed to the upgrade hook.
///
/// Exposes identity accessors and an aborted flag the server keeps
/// current; an asynchronous decision observed after an abort is dropped.
pub struct UpgradeContext<T: Transport> {
    req: T::Request,
    ip: String,
    aborted: Rc<Cell<bool>>,
}

impl<T: Transport> UpgradeContext<T> {
    pub(crate) fn new(req: T::Request, ip: String, aborted: Rc<Cell<bool>>) -> Self {
        Self { req, ip, aborted }
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.req.url()
    }

    /// Client IP, proxy-reported when available.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// A request header by lowercase name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.req.header(name)
    }

    /// A query-string value by key.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<String> {
        self.req.query(name)
    }

    /// A route parameter, by index or by name.
    #[must_use]
    pub fn param<'a>(&self, key: impl Into<ParamKey<'a>>) -> Option<String> {
        match key.into() {
            ParamKey::Index(index) => self.req.parameter(index),
            ParamKey::Name(name) => self.req.parameter_by_name(name),
        }
    }

    /// Whether the transport aborted while the decision was pending.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }
}

/// The upgrade hook's verdict.
#[derive(Clone)]
pub struct UpgradeDecision {
    /// Allow the upgrade.
    pub allowed: bool,
    /// Per-socket user data carried into the connection.
    pub user_data: Option<Rc<dyn Any>>,
}

impl UpgradeDecision {
    /// Allow, with no user data.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            user_data: None,
        }
    }

    /// Allow, carrying user data into the socket.
    #[must_use]
    pub fn allow_with(user_data: Rc<dyn Any>) -> Self {
        Self {
            allowed: true,
            user_data: Some(user_data),
        }
    }

    /// Deny; the server responds 403.
    #[must_use]
    pub fn deny() -> Self {
        Self {
            allowed: false,
            user_data: None,
        }
    }
}

impl fmt::Debug for UpgradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeDecision")
            .field("allowed", &self.allowed)
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// What the upgrade hook hands back: a verdict now, or one settling later.
pub enum UpgradeOutcome {
    /// Decided synchronously.
    Sync(UpgradeDecision),
    /// Decided later; a rejection counts as deny.
    Deferred(Deferred<UpgradeDecision, HttpError>),
}

impl From<UpgradeDecision> for UpgradeOutcome {
    fn from(decision: UpgradeDecision) -> Self {
        Self::Sync(decision)
    }
}

impl From<Deferred<UpgradeDecision, HttpError>> for UpgradeOutcome {
    fn from(deferred: Deferred<UpgradeDecision, HttpError>) -> Self {
        Self::Deferred(deferred)
    }
}

/// Completion of a user hook that may finish asynchronously.
pub enum HookOutcome {
    /// Finished inline.
    Done,
    /// Finishes when the deferred settles.
    Pending(Deferred<(), HttpError>),
}

impl From<()> for HookOutcome {
    fn from((): ()) -> Self {
        Self::Done
    }
}

impl From<Deferred<(), HttpError>> for HookOutcome {
    fn from(deferred: Deferred<(), HttpError>) -> Self {
        Self::Pending(deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_infers_frame_type_from_shape() {
        assert!(!WsMessage::from("hi").is_binary());
        assert!(WsMessage::from(vec![1u8, 2]).is_binary());
        assert!(WsMessage::from(Bytes::from_static(b"x")).is_binary());
    }

    #[test]
    fn text_frame_round_trips_utf8() {
        let message = WsMessage::from_frame(b"hello", false);
        assert_eq!(message, WsMessage::Text("hello".into()));
        assert_eq!(message.as_bytes(), b"hello");
    }

    #[test]
    fn ws_error_display() {
        assert_eq!(
            WsError::Detached.to_string(),
            "websocket context used after release"
        );
    }
}
