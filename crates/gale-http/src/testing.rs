//! Mock transport for tests and demos.
//!
//! [`MockTransport`] implements the whole transport trait family in
//! memory with scriptable events: tests deliver body chunks, trigger
//! aborts, drain the send buffer, fire timers and drive WebSocket frames,
//! then assert on the captured wire.
//!
//! Backpressure is simulated with a write capacity: once more than the
//! configured number of bytes has been queued since the last drain,
//! `write` keeps accepting bytes but reports partial queueing, exactly
//! like a socket whose send buffer filled mid-chunk.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::transport::{
    AppHandle, ListenSocketHandle, RequestHandle, ResponseHandle, RouteMethod, Transport,
    WebSocketHandle, WsBehavior, WsUserData,
};

/// The in-memory transport used by the test suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTransport;

impl Transport for MockTransport {
    type Response = MockResponse;
    type Request = MockRequest;
    type WebSocket = MockWebSocket;
    type ListenSocket = MockListenSocket;
    type Timer = MockTimer;
    type App = MockApp;
}

// ----------------------------------------------------------------------
// Request
// ----------------------------------------------------------------------

/// A scripted inbound request.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl MockRequest {
    /// A request with a method and URL path.
    #[must_use]
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Adds a query-string entry.
    #[must_use]
    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }
}

impl RequestHandle for MockRequest {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    }

    fn query(&self, name: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    fn parameter(&self, index: usize) -> Option<String> {
        self.params.get(index).map(|(_, value)| value.clone())
    }

    fn parameter_by_name(&self, name: &str) -> Option<String> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }
}

// ----------------------------------------------------------------------
// Response
// ----------------------------------------------------------------------

type DataCallback = Box<dyn FnMut(&[u8], bool)>;
type AbortCallback = Box<dyn FnMut()>;
type WritableCallback = Box<dyn FnMut(u64) -> bool>;

/// The three protocol headers recorded by an upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRecord {
    /// `sec-websocket-key`.
    pub key: String,
    /// `sec-websocket-protocol`.
    pub protocol: Option<String>,
    /// `sec-websocket-extensions`.
    pub extensions: Option<String>,
}

#[derive(Default)]
struct ResponseState {
    status: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    offset: u64,
    ended: bool,
    aborted: bool,
    corks: usize,
    write_capacity: Option<usize>,
    written_since_drain: usize,
    remote: Option<String>,
    proxied: Option<String>,
    on_data: Option<DataCallback>,
    on_aborted: Option<AbortCallback>,
    on_writable: Option<WritableCallback>,
    upgrade: Option<UpgradeRecord>,
    upgrade_user_data: Option<WsUserData<MockTransport>>,
}

/// A scripted response handle. Clones alias the same response.
#[derive(Clone, Default)]
pub struct MockResponse {
    state: Rc<RefCell<ResponseState>>,
}

impl MockResponse {
    /// A fresh response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports backpressure once more than `bytes` have been queued since
    /// the last [`drain_writable`](Self::drain_writable).
    #[must_use]
    pub fn with_write_capacity(self, bytes: usize) -> Self {
        self.state.borrow_mut().write_capacity = Some(bytes);
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub fn with_remote(self, addr: &str) -> Self {
        self.state.borrow_mut().remote = Some(addr.to_string());
        self
    }

    /// Sets the proxy-reported peer address.
    #[must_use]
    pub fn with_proxied_remote(self, addr: &str) -> Self {
        self.state.borrow_mut().proxied = Some(addr.to_string());
        self
    }

    // -- test drivers --------------------------------------------------

    /// Delivers a body chunk into the installed data sink.
    pub fn deliver_data(&self, chunk: &[u8], is_last: bool) {
        let callback = self.state.borrow_mut().on_data.take();
        if let Some(mut callback) = callback {
            callback(chunk, is_last);
            let mut state = self.state.borrow_mut();
            if state.on_data.is_none() {
                state.on_data = Some(callback);
            }
        }
    }

    /// Signals a transport abort. Delivered at most once.
    pub fn trigger_abort(&self) {
        let callback = {
            let mut state = self.state.borrow_mut();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.on_aborted.take()
        };
        if let Some(mut callback) = callback {
            callback();
        }
    }

    /// Drains the simulated send buffer and fires the writable hook with
    /// the current offset.
    pub fn drain_writable(&self) {
        let (callback, offset) = {
            let mut state = self.state.borrow_mut();
            state.written_since_drain = 0;
            (state.on_writable.take(), state.offset)
        };
        if let Some(mut callback) = callback {
            let handled = callback(offset);
            let mut state = self.state.borrow_mut();
            // A hook reporting "not handled" stays installed.
            if !handled && state.on_writable.is_none() {
                state.on_writable = Some(callback);
            }
        }
    }

    // -- assertions ----------------------------------------------------

    /// The written status line, if any.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        self.state.borrow().status.clone()
    }

    /// All written headers, in order.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        self.state.borrow().headers.clone()
    }

    /// The first written header with this name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Every body byte written, in order.
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        self.state.borrow().body.clone()
    }

    /// The body as UTF-8.
    #[must_use]
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.state.borrow().body).into_owned()
    }

    /// Whether the response is closed.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }

    /// Number of cork sections entered.
    #[must_use]
    pub fn cork_count(&self) -> usize {
        self.state.borrow().corks
    }

    /// Whether a writable hook is installed.
    #[must_use]
    pub fn has_writable_hook(&self) -> bool {
        self.state.borrow().on_writable.is_some()
    }

    /// The recorded upgrade, if one happened.
    #[must_use]
    pub fn upgrade_record(&self) -> Option<UpgradeRecord> {
        self.state.borrow().upgrade.clone()
    }

    /// Takes the user data captured by an upgrade.
    #[must_use]
    pub fn take_upgrade_user_data(&self) -> Option<WsUserData<MockTransport>> {
        self.state.borrow_mut().upgrade_user_data.take()
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockResponse")
            .field("status", &state.status)
            .field("ended", &state.ended)
            .field("aborted", &state.aborted)
            .field("body_len", &state.body.len())
            .finish_non_exhaustive()
    }
}

impl ResponseHandle<MockTransport> for MockResponse {
    fn on_data(&mut self, callback: DataCallback) {
        self.state.borrow_mut().on_data = Some(callback);
    }

    fn on_aborted(&mut self, callback: AbortCallback) {
        self.state.borrow_mut().on_aborted = Some(callback);
    }

    fn on_writable(&mut self, callback: WritableCallback) {
        self.state.borrow_mut().on_writable = Some(callback);
    }

    fn cork(&mut self, section: &mut dyn FnMut(&mut Self)) {
        self.state.borrow_mut().corks += 1;
        section(self);
    }

    fn write_status(&mut self, line: &str) {
        self.state.borrow_mut().status = Some(line.to_string());
    }

    fn write_header(&mut self, name: &str, value: &str) {
        self.state
            .borrow_mut()
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn write(&mut self, chunk: &[u8]) -> bool {
        let mut state = self.state.borrow_mut();
        if state.ended || state.aborted {
            return false;
        }
        state.body.extend_from_slice(chunk);
        state.offset += chunk.len() as u64;
        state.written_since_drain += chunk.len();
        match state.write_capacity {
            Some(capacity) => state.written_since_drain <= capacity,
            None => true,
        }
    }

    fn try_end(&mut self, chunk: &[u8], total_size: u64) -> (bool, bool) {
        let mut state = self.state.borrow_mut();
        if state.ended || state.aborted {
            return (false, false);
        }
        state.body.extend_from_slice(chunk);
        state.offset += chunk.len() as u64;
        state.written_since_drain += chunk.len();
        let ok = match state.write_capacity {
            Some(capacity) => state.written_since_drain <= capacity,
            None => true,
        };
        let done = state.offset >= total_size;
        if done {
            state.ended = true;
        }
        (ok, done)
    }

    fn end(&mut self, chunk: Option<&[u8]>) {
        let mut state = self.state.borrow_mut();
        if state.ended || state.aborted {
            return;
        }
        if let Some(chunk) = chunk {
            state.body.extend_from_slice(chunk);
            state.offset += chunk.len() as u64;
        }
        state.ended = true;
    }

    fn write_offset(&self) -> u64 {
        self.state.borrow().offset
    }

    fn remote_address(&self) -> String {
        self.state
            .borrow()
            .remote
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    fn proxied_remote_address(&self) -> Option<String> {
        self.state.borrow().proxied.clone()
    }

    fn upgrade(
        &mut self,
        user_data: WsUserData<MockTransport>,
        key: &str,
        protocol: Option<&str>,
        extensions: Option<&str>,
    ) {
        let mut state = self.state.borrow_mut();
        state.upgrade = Some(UpgradeRecord {
            key: key.to_string(),
            protocol: protocol.map(str::to_string),
            extensions: extensions.map(str::to_string),
        });
        state.upgrade_user_data = Some(user_data);
        state.ended = true;
    }
}

// ----------------------------------------------------------------------
// Listen socket and timers
// ----------------------------------------------------------------------

/// The mock listen socket.
#[derive(Debug, Clone, Default)]
pub struct MockListenSocket {
    closed: Rc<Cell<bool>>,
}

impl MockListenSocket {
    /// Whether the socket was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl ListenSocketHandle for MockListenSocket {
    fn close(&mut self) {
        self.closed.set(true);
    }
}

/// A timer handle: index into the app's timer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTimer(usize);

// ----------------------------------------------------------------------
// WebSocket
// ----------------------------------------------------------------------

struct SocketState {
    path: String,
    user_data: WsUserData<MockTransport>,
    sent: Vec<(Vec<u8>, bool)>,
    closed: Option<(u16, String)>,
    app: Weak<RefCell<AppState>>,
}

/// A scripted WebSocket handle. Clones alias the same socket.
#[derive(Clone)]
pub struct MockWebSocket {
    state: Rc<RefCell<SocketState>>,
}

impl MockWebSocket {
    /// Frames sent to the peer, `(payload, binary)`.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<(Vec<u8>, bool)> {
        self.state.borrow().sent.clone()
    }

    /// The close code and reason, if the socket was closed.
    #[must_use]
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.state.borrow().closed.clone()
    }

    /// Whether the socket is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed.is_some()
    }

    fn same_socket(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for MockWebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockWebSocket")
            .field("path", &state.path)
            .field("sent", &state.sent.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl WebSocketHandle<MockTransport> for MockWebSocket {
    fn with_user_data(&self, f: &mut dyn FnMut(&mut WsUserData<MockTransport>)) {
        f(&mut self.state.borrow_mut().user_data);
    }

    fn send(&mut self, data: &[u8], binary: bool) -> bool {
        let mut state = self.state.borrow_mut();
        if state.closed.is_some() {
            return false;
        }
        state.sent.push((data.to_vec(), binary));
        true
    }

    fn end(&mut self, code: u16, reason: &str) {
        let (app, path) = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some((code, reason.to_string()));
            (state.app.clone(), state.path.clone())
        };
        let Some(app) = app.upgrade() else { return };
        remove_from_topics(&app, self);
        // Closing the socket fires the close callback, like the transport.
        if let Some(route) = find_ws_route(&app, &path) {
            let reason = reason.as_bytes().to_vec();
            let mut socket = self.clone();
            call_slot(&route.close, |cb| cb(&mut socket, code, &reason));
        }
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let (app, path) = {
            let state = self.state.borrow();
            if state.closed.is_some() {
                return false;
            }
            (state.app.clone(), state.path.clone())
        };
        let Some(app) = app.upgrade() else {
            return false;
        };
        let (old_count, new_count) = {
            let mut app_state = app.borrow_mut();
            let subscribers = app_state.topics.entry(topic.to_string()).or_default();
            let old_count = subscribers.len();
            if subscribers.iter().any(|ws| ws.same_socket(self)) {
                return true;
            }
            subscribers.push(self.clone());
            (old_count, old_count + 1)
        };
        if let Some(route) = find_ws_route(&app, &path) {
            let mut socket = self.clone();
            call_slot(&route.subscription, |cb| {
                cb(&mut socket, topic, new_count, old_count);
            });
        }
        true
    }

    fn unsubscribe(&mut self, topic: &str) -> bool {
        let (app, path) = {
            let state = self.state.borrow();
            (state.app.clone(), state.path.clone())
        };
        let Some(app) = app.upgrade() else {
            return false;
        };
        let (old_count, new_count) = {
            let mut app_state = app.borrow_mut();
            let Some(subscribers) = app_state.topics.get_mut(topic) else {
                return false;
            };
            let old_count = subscribers.len();
            subscribers.retain(|ws| !ws.same_socket(self));
            if subscribers.len() == old_count {
                return false;
            }
            (old_count, subscribers.len())
        };
        if let Some(route) = find_ws_route(&app, &path) {
            let mut socket = self.clone();
            call_slot(&route.subscription, |cb| {
                cb(&mut socket, topic, new_count, old_count);
            });
        }
        true
    }
}

fn remove_from_topics(app: &Rc<RefCell<AppState>>, socket: &MockWebSocket) {
    let mut app_state = app.borrow_mut();
    for subscribers in app_state.topics.values_mut() {
        subscribers.retain(|ws| !ws.same_socket(socket));
    }
}

/// The registered WebSocket callbacks, each in its own takeable slot so a
/// callback can re-enter another (close fired from inside message, etc.).
struct WsRoute {
    pattern: String,
    idle_timeout_secs: u32,
    upgrade: RefCell<Option<Box<dyn FnMut(MockResponse, MockRequest)>>>,
    open: RefCell<Option<Box<dyn FnMut(&mut MockWebSocket)>>>,
    message: RefCell<Option<Box<dyn FnMut(&mut MockWebSocket, &[u8], bool)>>>,
    drain: RefCell<Option<Box<dyn FnMut(&mut MockWebSocket)>>>,
    close: RefCell<Option<Box<dyn FnMut(&mut MockWebSocket, u16, &[u8])>>>,
    subscription: RefCell<Option<Box<dyn FnMut(&mut MockWebSocket, &str, usize, usize)>>>,
}

fn find_ws_route(app: &Rc<RefCell<AppState>>, path: &str) -> Option<Rc<WsRoute>> {
    let app_state = app.borrow();
    app_state
        .ws_routes
        .iter()
        .find(|route| route.pattern == path || match_path(&route.pattern, path).is_some())
        .cloned()
}

/// Take-call-restore around one callback slot: the callback may re-enter
/// the app (publish, other slots) while it runs.
fn call_slot<C: ?Sized>(slot: &RefCell<Option<Box<C>>>, f: impl FnOnce(&mut C)) {
    let taken = slot.borrow_mut().take();
    if let Some(mut callback) = taken {
        f(&mut callback);
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

// ----------------------------------------------------------------------
// App
// ----------------------------------------------------------------------

struct MockRoute {
    method: RouteMethod,
    path: String,
    handler: Option<Box<dyn FnMut(MockResponse, MockRequest)>>,
}

#[derive(Default)]
struct AppState {
    routes: Vec<MockRoute>,
    ws_routes: Vec<Rc<WsRoute>>,
    listen_port: Option<u16>,
    listen_socket: Option<MockListenSocket>,
    fail_listen: bool,
    closed: bool,
    timers: Vec<Option<Box<dyn FnOnce()>>>,
    cancelled_timers: usize,
    topics: HashMap<String, Vec<MockWebSocket>>,
    published: Vec<(String, Vec<u8>, bool)>,
}

/// The mock application handle. Clones alias the same app.
#[derive(Clone, Default)]
pub struct MockApp {
    state: Rc<RefCell<AppState>>,
}

impl MockApp {
    /// A fresh app.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `listen` report failure.
    #[must_use]
    pub fn failing_listen(self) -> Self {
        self.state.borrow_mut().fail_listen = true;
        self
    }

    // -- test drivers --------------------------------------------------

    /// Routes a scripted request through the registered handlers,
    /// returning the response it was served on.
    #[must_use]
    pub fn simulate(&self, req: MockRequest) -> MockResponse {
        self.simulate_on(req, MockResponse::new())
    }

    /// Routes a scripted request onto a pre-configured response.
    pub fn simulate_on(&self, req: MockRequest, res: MockResponse) -> MockResponse {
        let matched = {
            let state = self.state.borrow();
            let method = req.method.to_ascii_lowercase();
            state.routes.iter().position(|route| {
                (route.method == RouteMethod::Any || route.method.as_str() == method)
                    && match_path(&route.path, &req.url).is_some()
            })
        };
        let Some(index) = matched else {
            return res;
        };
        let handler = self.state.borrow_mut().routes[index].handler.take();
        if let Some(mut handler) = handler {
            let params = {
                let state = self.state.borrow();
                match_path(&state.routes[index].path, &req.url).unwrap_or_default()
            };
            handler(res.clone(), req.with_params(params));
            let mut state = self.state.borrow_mut();
            if state.routes[index].handler.is_none() {
                state.routes[index].handler = Some(handler);
            }
        }
        res
    }

    /// Drives an upgrade request at a WebSocket route.
    pub fn ws_upgrade(&self, req: MockRequest, res: MockResponse) -> MockResponse {
        if let Some(route) = find_ws_route(&self.state, &req.url) {
            call_slot(&route.upgrade, |cb| cb(res.clone(), req));
        }
        res
    }

    /// Opens a socket at a WebSocket route with the given user data,
    /// firing the open callback. Returns the socket handle.
    pub fn ws_open(&self, path: &str, user_data: WsUserData<MockTransport>) -> MockWebSocket {
        let socket = MockWebSocket {
            state: Rc::new(RefCell::new(SocketState {
                path: path.to_string(),
                user_data,
                sent: Vec::new(),
                closed: None,
                app: Rc::downgrade(&self.state),
            })),
        };
        if let Some(route) = find_ws_route(&self.state, path) {
            let mut opened = socket.clone();
            call_slot(&route.open, |cb| cb(&mut opened));
        }
        socket
    }

    /// Completes a recorded upgrade: opens the socket with the user data
    /// the upgrade captured.
    pub fn ws_open_upgraded(&self, path: &str, res: &MockResponse) -> Option<MockWebSocket> {
        let user_data = res.take_upgrade_user_data()?;
        Some(self.ws_open(path, user_data))
    }

    /// Delivers an inbound frame to the socket's message callback.
    pub fn ws_message(&self, socket: &MockWebSocket, data: &[u8], binary: bool) {
        let path = socket.state.borrow().path.clone();
        if let Some(route) = find_ws_route(&self.state, &path) {
            let mut socket = socket.clone();
            call_slot(&route.message, |cb| cb(&mut socket, data, binary));
        }
    }

    /// Fires the socket's drain callback.
    pub fn ws_drain(&self, socket: &MockWebSocket) {
        let path = socket.state.borrow().path.clone();
        if let Some(route) = find_ws_route(&self.state, &path) {
            let mut socket = socket.clone();
            call_slot(&route.drain, |cb| cb(&mut socket));
        }
    }

    /// Simulates the peer closing the socket.
    pub fn ws_client_close(&self, socket: &MockWebSocket, code: u16, reason: &str) {
        let mut socket = socket.clone();
        socket.end(code, reason);
    }

    /// Fires a pending timer by index. Returns false if it was cancelled
    /// or already fired.
    pub fn fire_timer(&self, index: usize) -> bool {
        let callback = {
            let mut state = self.state.borrow_mut();
            state.timers.get_mut(index).and_then(Option::take)
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    // -- assertions ----------------------------------------------------

    /// The port passed to `listen`, if any.
    #[must_use]
    pub fn listen_port(&self) -> Option<u16> {
        self.state.borrow().listen_port
    }

    /// The listen socket handed out, if any.
    #[must_use]
    pub fn listen_socket(&self) -> Option<MockListenSocket> {
        self.state.borrow().listen_socket.clone()
    }

    /// Whether the app resource was released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of timers armed so far.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Number of timers cancelled.
    #[must_use]
    pub fn cancelled_timer_count(&self) -> usize {
        self.state.borrow().cancelled_timers
    }

    /// Every published message, `(topic, payload, binary)`.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.state.borrow().published.clone()
    }

    /// The idle timeout registered for a WebSocket route.
    #[must_use]
    pub fn ws_idle_timeout(&self, path: &str) -> Option<u32> {
        find_ws_route(&self.state, path).map(|route| route.idle_timeout_secs)
    }
}

impl fmt::Debug for MockApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MockApp")
            .field("routes", &state.routes.len())
            .field("ws_routes", &state.ws_routes.len())
            .field("listen_port", &state.listen_port)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl AppHandle<MockTransport> for MockApp {
    fn route(
        &mut self,
        method: RouteMethod,
        path: &str,
        handler: Box<dyn FnMut(MockResponse, MockRequest)>,
    ) {
        self.state.borrow_mut().routes.push(MockRoute {
            method,
            path: path.to_string(),
            handler: Some(handler),
        });
    }

    fn ws(&mut self, path: &str, behavior: WsBehavior<MockTransport>) {
        self.state.borrow_mut().ws_routes.push(Rc::new(WsRoute {
            pattern: path.to_string(),
            idle_timeout_secs: behavior.idle_timeout_secs,
            upgrade: RefCell::new(Some(behavior.upgrade)),
            open: RefCell::new(Some(behavior.open)),
            message: RefCell::new(Some(behavior.message)),
            drain: RefCell::new(Some(behavior.drain)),
            close: RefCell::new(Some(behavior.close)),
            subscription: RefCell::new(Some(behavior.subscription)),
        }));
    }

    fn listen(&mut self, port: u16, callback: Box<dyn FnOnce(Option<MockListenSocket>)>) {
        let socket = {
            let mut state = self.state.borrow_mut();
            if state.fail_listen {
                None
            } else {
                let socket = MockListenSocket::default();
                state.listen_port = Some(port);
                state.listen_socket = Some(socket.clone());
                Some(socket)
            }
        };
        callback(socket);
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }

    fn publish(&mut self, topic: &str, message: &[u8], binary: bool) -> bool {
        let subscribers = {
            let mut state = self.state.borrow_mut();
            state
                .published
                .push((topic.to_string(), message.to_vec(), binary));
            state.topics.get(topic).cloned().unwrap_or_default()
        };
        let delivered = !subscribers.is_empty();
        for mut socket in subscribers {
            socket.send(message, binary);
        }
        delivered
    }

    fn num_subscribers(&self, topic: &str) -> usize {
        self.state
            .borrow()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn set_timer(&mut self, _delay_ms: u64, callback: Box<dyn FnOnce()>) -> MockTimer {
        let mut state = self.state.borrow_mut();
        state.timers.push(Some(callback));
        MockTimer(state.timers.len() - 1)
    }

    fn cancel_timer(&mut self, timer: MockTimer) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.timers.get_mut(timer.0) {
            if slot.take().is_some() {
                state.cancelled_timers += 1;
            }
        }
    }
}

/// Minimal `:param` / `/*` matcher standing in for the transport's native
/// router.
fn match_path(pattern: &str, url: &str) -> Option<Vec<(String, String)>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let url_segments: Vec<&str> = url
        .split('?')
        .next()
        .unwrap_or(url)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let mut params = Vec::new();
    let mut index = 0;
    for segment in &pattern_segments {
        if *segment == "*" {
            return Some(params);
        }
        let Some(actual) = url_segments.get(index) else {
            return None;
        };
        if let Some(name) = segment.strip_prefix(':') {
            params.push((name.to_string(), (*actual).to_string()));
        } else if segment != actual {
            return None;
        }
        index += 1;
    }
    if index == url_segments.len() {
        Some(params)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_matching_static_and_params() {
        assert_eq!(match_path("/users", "/users"), Some(vec![]));
        assert_eq!(match_path("/users", "/posts"), None);
        assert_eq!(
            match_path("/users/:id", "/users/42"),
            Some(vec![("id".to_string(), "42".to_string())])
        );
        assert_eq!(match_path("/users/:id", "/users"), None);
        assert_eq!(match_path("/files/*", "/files/a/b/c"), Some(vec![]));
        assert_eq!(match_path("/users/:id", "/users/42/posts"), None);
    }

    #[test]
    fn query_string_is_ignored_for_matching() {
        assert_eq!(match_path("/search", "/search?q=x"), Some(vec![]));
    }

    #[test]
    fn response_write_capacity_reports_backpressure() {
        let mut res = MockResponse::new().with_write_capacity(8);
        assert!(res.write(b"12345678"));
        assert!(!res.write(b"9"));
        res.drain_writable();
        assert!(res.write(b"abc"));
    }

    #[test]
    fn response_end_is_sticky() {
        let mut res = MockResponse::new();
        res.end(Some(b"done"));
        assert!(!res.write(b"late"));
        assert_eq!(res.body_str(), "done");
    }
}
