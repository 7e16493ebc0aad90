//! The transport seam.
//!
//! The TCP/TLS event loop, the HTTP/1.1 parser and the WebSocket handshake
//! are external collaborators. The engine consumes them through this trait
//! family and is generic over [`Transport`]; the test suite drives the
//! engine through the mock implementation in [`crate::testing`].
//!
//! All callbacks are single-threaded: the transport guarantees ordered
//! delivery per socket, `on_data` chunks arrive strictly in order,
//! `on_writable` fires only after a prior partial write, and `on_aborted`
//! is delivered at most once.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::websocket::WsContext;

/// The transport type family the engine runs on.
pub trait Transport: Sized + 'static {
    /// Per-response handle (egress plus ingress callbacks).
    type Response: ResponseHandle<Self>;
    /// Per-request handle (parsed request line, headers, route params).
    type Request: RequestHandle;
    /// Live WebSocket handle. Clones alias the same socket.
    type WebSocket: WebSocketHandle<Self> + Clone;
    /// Handle to the listening socket, closed to stop accepting.
    type ListenSocket: ListenSocketHandle;
    /// Timer handle returned by [`AppHandle::set_timer`].
    type Timer;
    /// The application/socket multiplexer handle.
    type App: AppHandle<Self>;
}

/// The transport's per-response handle.
pub trait ResponseHandle<T: Transport>: 'static {
    /// Installs the body chunk sink. The callback receives each chunk and
    /// whether it is the terminal chunk.
    fn on_data(&mut self, callback: Box<dyn FnMut(&[u8], bool)>);

    /// Installs the abort hook, delivered at most once.
    fn on_aborted(&mut self, callback: Box<dyn FnMut()>);

    /// Installs the writable hook, fired with the current write offset
    /// after a partial write once the send buffer drains. Returning true
    /// reports the event as handled.
    fn on_writable(&mut self, callback: Box<dyn FnMut(u64) -> bool>);

    /// Runs `section` inside the transport's cork critical section so the
    /// status, headers and body land in one syscall boundary.
    fn cork(&mut self, section: &mut dyn FnMut(&mut Self));

    /// Writes the status line (`"200 OK"`).
    fn write_status(&mut self, line: &str);

    /// Writes a single header.
    fn write_header(&mut self, name: &str, value: &str);

    /// Queues a body chunk. Returns false if only partially queued
    /// (backpressure).
    fn write(&mut self, chunk: &[u8]) -> bool;

    /// Queues a final chunk with the declared total response size.
    /// Returns `(ok, done)`; `done` means the response is fully flushed.
    fn try_end(&mut self, chunk: &[u8], total_size: u64) -> (bool, bool);

    /// Closes the response unconditionally.
    fn end(&mut self, chunk: Option<&[u8]>);

    /// Current write offset.
    fn write_offset(&self) -> u64;

    /// Peer address as text.
    fn remote_address(&self) -> String;

    /// Proxy-reported peer address, if any.
    fn proxied_remote_address(&self) -> Option<String>;

    /// Performs the WebSocket upgrade, passing through the three protocol
    /// headers and the per-socket user data.
    fn upgrade(
        &mut self,
        user_data: WsUserData<T>,
        key: &str,
        protocol: Option<&str>,
        extensions: Option<&str>,
    );
}

/// The transport's per-request handle.
pub trait RequestHandle: 'static {
    /// Request method, as parsed (any case).
    fn method(&self) -> String;
    /// Request URL path.
    fn url(&self) -> String;
    /// A header value by lowercase name.
    fn header(&self, name: &str) -> Option<String>;
    /// A query-string value by key.
    fn query(&self, name: &str) -> Option<String>;
    /// A route parameter by position.
    fn parameter(&self, index: usize) -> Option<String>;
    /// A route parameter by name.
    fn parameter_by_name(&self, name: &str) -> Option<String>;
}

/// Per-socket user data carried through a WebSocket upgrade.
///
/// The context slot is a dedicated field: the engine maps a live socket to
/// its [`WsContext`] here rather than through a hidden key.
pub struct WsUserData<T: Transport> {
    /// The engine's context for this socket, set at open.
    pub context: Option<Rc<WsContext<T>>>,
    /// The user payload returned from the upgrade hook.
    pub payload: Option<Rc<dyn Any>>,
}

impl<T: Transport> WsUserData<T> {
    /// User data with an optional upgrade payload.
    #[must_use]
    pub fn new(payload: Option<Rc<dyn Any>>) -> Self {
        Self {
            context: None,
            payload,
        }
    }
}

impl<T: Transport> Default for WsUserData<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T: Transport> fmt::Debug for WsUserData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsUserData")
            .field("has_context", &self.context.is_some())
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// The transport's live WebSocket handle.
pub trait WebSocketHandle<T: Transport>: 'static {
    /// Grants access to this socket's user data.
    fn with_user_data(&self, f: &mut dyn FnMut(&mut WsUserData<T>));

    /// Sends a frame. Returns false under backpressure.
    fn send(&mut self, data: &[u8], binary: bool) -> bool;

    /// Closes the socket with a code and reason.
    fn end(&mut self, code: u16, reason: &str);

    /// Subscribes the socket to a topic.
    fn subscribe(&mut self, topic: &str) -> bool;

    /// Unsubscribes the socket from a topic.
    fn unsubscribe(&mut self, topic: &str) -> bool;
}

/// Reads the context slot out of a socket's user data.
pub(crate) fn socket_context<T: Transport>(ws: &T::WebSocket) -> Option<Rc<WsContext<T>>> {
    let mut out = None;
    ws.with_user_data(&mut |data| out = data.context.clone());
    out
}

/// Writes the context slot of a socket's user data.
pub(crate) fn set_socket_context<T: Transport>(
    ws: &T::WebSocket,
    context: Option<Rc<WsContext<T>>>,
) {
    ws.with_user_data(&mut |data| data.context = context.clone());
}

/// Takes the upgrade payload out of a socket's user data.
pub(crate) fn take_socket_payload<T: Transport>(ws: &T::WebSocket) -> Option<Rc<dyn Any>> {
    let mut out = None;
    ws.with_user_data(&mut |data| out = data.payload.take());
    out
}

/// Handle to the listening socket.
pub trait ListenSocketHandle: 'static {
    /// Stops accepting new connections.
    fn close(&mut self);
}

/// HTTP route methods accepted at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    /// Matches every method.
    Any,
}

impl RouteMethod {
    /// Lowercase method name, `"any"` for the wildcard.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Options => "options",
            Self::Head => "head",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The WebSocket callback bundle installed on the transport per ws route.
pub struct WsBehavior<T: Transport> {
    /// Idle timeout in seconds.
    pub idle_timeout_secs: u32,
    /// Upgrade request arrived.
    pub upgrade: Box<dyn FnMut(T::Response, T::Request)>,
    /// Socket opened after a successful upgrade.
    pub open: Box<dyn FnMut(&mut T::WebSocket)>,
    /// Message frame arrived.
    pub message: Box<dyn FnMut(&mut T::WebSocket, &[u8], bool)>,
    /// Send buffer drained.
    pub drain: Box<dyn FnMut(&mut T::WebSocket)>,
    /// Socket closed.
    pub close: Box<dyn FnMut(&mut T::WebSocket, u16, &[u8])>,
    /// Topic subscription count changed.
    pub subscription: Box<dyn FnMut(&mut T::WebSocket, &str, usize, usize)>,
}

impl<T: Transport> fmt::Debug for WsBehavior<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsBehavior")
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// The application handle: route registration, listen lifecycle, fan-out.
pub trait AppHandle<T: Transport>: 'static {
    /// Registers an HTTP route with the transport's native router.
    /// Parameter syntax `:name` and wildcard `/*` pass through verbatim.
    fn route(&mut self, method: RouteMethod, path: &str, handler: Box<dyn FnMut(T::Response, T::Request)>);

    /// Registers a WebSocket route.
    fn ws(&mut self, path: &str, behavior: WsBehavior<T>);

    /// Binds and listens; the callback receives the listen socket, or
    /// `None` on failure.
    fn listen(&mut self, port: u16, callback: Box<dyn FnOnce(Option<T::ListenSocket>)>);

    /// Releases the application resource.
    fn close(&mut self);

    /// Publishes a message to every subscriber of a topic.
    fn publish(&mut self, topic: &str, message: &[u8], binary: bool) -> bool;

    /// Number of current subscribers of a topic.
    fn num_subscribers(&self, topic: &str) -> usize;

    /// Arms a one-shot timer on the event loop.
    fn set_timer(&mut self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> T::Timer;

    /// Cancels a timer armed with [`set_timer`](Self::set_timer).
    fn cancel_timer(&mut self, timer: T::Timer);
}
