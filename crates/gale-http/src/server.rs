//! Server lifecycle: route registration, dispatch, drain and close.
//!
//! The server owns the two context pools, forwards routes verbatim to the
//! transport's native router, dispatches inbound requests onto pooled
//! [`HttpContext`]s, tracks active work, and coordinates graceful drain:
//! once draining, new HTTP requests are rejected with `503` +
//! `Connection: close`, new WebSocket opens are closed with code 1001, and
//! the shutdown completion settles when both active counters reach zero or
//! the grace timer forces a close.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use gale_core::{
    ConfigError, Deferred, HttpError, LogConfig, Logger, Pool, Settle,
};

use crate::context::{Handler, HandlerOutcome, HttpContext};
use crate::transport::{
    set_socket_context, socket_context, take_socket_payload, AppHandle, ListenSocketHandle,
    RequestHandle, ResponseHandle, RouteMethod, Transport, WebSocketHandle, WsBehavior,
    WsUserData,
};
use crate::websocket::{
    HookOutcome, UpgradeContext, UpgradeDecision, UpgradeOutcome, WsContext, WsMessage,
};

/// Default port when none is configured.
pub const DEFAULT_PORT: u32 = 6000;

/// Default body limit in MiB.
pub const DEFAULT_MAX_BODY_MIB: u32 = 1;

/// Default WebSocket idle timeout in seconds.
pub const DEFAULT_WS_IDLE_TIMEOUT_SECS: u32 = 15;

/// Minimum WebSocket idle timeout in seconds.
pub const MIN_WS_IDLE_TIMEOUT_SECS: u32 = 5;

/// How many contexts each pool retains.
const POOL_CAPACITY: usize = 1024;

/// A registered HTTP route.
pub struct Route<T: Transport> {
    /// Accepted method.
    pub method: RouteMethod,
    /// Path pattern; `:name` and `/*` pass through to the native router.
    pub path: String,
    /// The handler.
    pub handler: Handler<T>,
}

impl<T: Transport> Route<T> {
    /// A route record.
    pub fn new(
        method: RouteMethod,
        path: impl Into<String>,
        handler: impl Fn(&HttpContext<T>) -> Result<HandlerOutcome, HttpError> + 'static,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Rc::new(handler),
        }
    }
}

impl<T: Transport> fmt::Debug for Route<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// The WebSocket option bundle.
pub struct WsOptions<T: Transport> {
    /// Route path for the WebSocket endpoint.
    pub path: String,
    /// Idle timeout in seconds, minimum 5.
    pub idle_timeout_secs: u32,
    /// Gate for upgrade requests; absent means allow.
    pub on_upgrade: Option<Rc<dyn Fn(&UpgradeContext<T>) -> UpgradeOutcome>>,
    /// Socket opened. An error routes to `on_error`.
    pub on_open: Option<Rc<dyn Fn(&Rc<WsContext<T>>) -> Result<(), HttpError>>>,
    /// Message arrived. An error routes to `on_error`.
    pub on_message: Option<Rc<dyn Fn(&Rc<WsContext<T>>, WsMessage) -> Result<(), HttpError>>>,
    /// Socket closed; may finish asynchronously.
    pub on_close: Option<Rc<dyn Fn(&Rc<WsContext<T>>, u16, &[u8]) -> HookOutcome>>,
    /// Send buffer drained.
    pub on_drain: Option<Rc<dyn Fn(&Rc<WsContext<T>>)>>,
    /// Topic subscription count changed.
    pub on_subscription: Option<Rc<dyn Fn(&Rc<WsContext<T>>, &str, usize, usize)>>,
    /// Error sink for WebSocket handlers.
    pub on_error: Option<Rc<dyn Fn(&Rc<WsContext<T>>, &HttpError)>>,
}

impl<T: Transport> Default for WsOptions<T> {
    fn default() -> Self {
        Self {
            path: "/*".to_string(),
            idle_timeout_secs: DEFAULT_WS_IDLE_TIMEOUT_SECS,
            on_upgrade: None,
            on_open: None,
            on_message: None,
            on_close: None,
            on_drain: None,
            on_subscription: None,
            on_error: None,
        }
    }
}

impl<T: Transport> fmt::Debug for WsOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsOptions")
            .field("path", &self.path)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Server configuration. Validated at listen time.
pub struct ServerOptions<T: Transport> {
    /// Listen port, in [1, 65535].
    pub port: u32,
    /// Body limit in MiB, in [1, 64].
    pub max_body_mib: u32,
    /// Method-specific routes. Mutually exclusive with `router`.
    pub routes: Vec<Route<T>>,
    /// A universal router handling every request. Mutually exclusive with
    /// `routes`.
    pub router: Option<Handler<T>>,
    /// Error sink for handler faults; faults inside it are swallowed.
    pub on_http_error: Option<Rc<dyn Fn(&HttpContext<T>, &HttpError)>>,
    /// WebSocket support; absent disables upgrades.
    pub ws: Option<WsOptions<T>>,
    /// Logging configuration.
    pub log: LogConfig,
}

impl<T: Transport> Default for ServerOptions<T> {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_body_mib: DEFAULT_MAX_BODY_MIB,
            routes: Vec::new(),
            router: None,
            on_http_error: None,
            ws: None,
            log: LogConfig::default(),
        }
    }
}

impl<T: Transport> fmt::Debug for ServerOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("port", &self.port)
            .field("max_body_mib", &self.max_body_mib)
            .field("routes", &self.routes.len())
            .field("has_router", &self.router.is_some())
            .field("has_ws", &self.ws.is_some())
            .finish_non_exhaustive()
    }
}

/// A point-in-time view of server counters, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMetrics {
    /// Requests currently being handled.
    pub active_http: usize,
    /// Open WebSocket connections.
    pub active_ws: usize,
    /// HTTP contexts resting in the pool.
    pub pooled_http: usize,
    /// WebSocket contexts resting in the pool.
    pub pooled_ws: usize,
    /// Whether the server is draining.
    pub draining: bool,
}

/// Shared server state. Route callbacks and context back-references hold
/// this behind an `Rc`.
pub struct ServerState<T: Transport> {
    port_raw: u32,
    max_body_mib: u32,
    port: Cell<u16>,
    max_body_bytes: Cell<usize>,
    routes: RefCell<Vec<Route<T>>>,
    router: RefCell<Option<Handler<T>>>,
    on_http_error: Option<Rc<dyn Fn(&HttpContext<T>, &HttpError)>>,
    ws: Option<WsOptions<T>>,
    logger: Logger,
    http_pool: Rc<Pool<HttpContext<T>>>,
    ws_pool: Rc<Pool<WsContext<T>>>,
    app: RefCell<Option<T::App>>,
    listen_socket: RefCell<Option<T::ListenSocket>>,
    listening: Cell<bool>,
    draining: Cell<bool>,
    closed: Cell<bool>,
    active_http: Cell<usize>,
    active_ws: Cell<usize>,
    shutdown: RefCell<Option<(Deferred<(), HttpError>, Settle<(), HttpError>)>>,
    shutdown_timer: RefCell<Option<T::Timer>>,
}

/// The server: route registration, dispatch, lifecycle.
pub struct Server<T: Transport> {
    state: Rc<ServerState<T>>,
}

impl<T: Transport> Server<T> {
    /// Builds a server from options. Validation happens at
    /// [`listen`](Self::listen).
    #[must_use]
    pub fn new(options: ServerOptions<T>) -> Self {
        let state = Rc::new(ServerState {
            port_raw: options.port,
            max_body_mib: options.max_body_mib,
            port: Cell::new(0),
            max_body_bytes: Cell::new(0),
            routes: RefCell::new(options.routes),
            router: RefCell::new(options.router),
            on_http_error: options.on_http_error,
            ws: options.ws,
            logger: Logger::new(options.log),
            http_pool: Pool::new(POOL_CAPACITY, HttpContext::with_pool),
            ws_pool: Pool::new(POOL_CAPACITY, WsContext::with_pool),
            app: RefCell::new(None),
            listen_socket: RefCell::new(None),
            listening: Cell::new(false),
            draining: Cell::new(false),
            closed: Cell::new(false),
            active_http: Cell::new(0),
            active_ws: Cell::new(0),
            shutdown: RefCell::new(None),
            shutdown_timer: RefCell::new(None),
        });
        Self { state }
    }

    /// Validates the configuration, registers every route and the
    /// WebSocket behavior with the transport, and starts listening.
    ///
    /// The returned deferred settles once the transport reports the
    /// listen outcome.
    ///
    /// # Errors
    ///
    /// Any configuration problem surfaces here, before the transport is
    /// touched.
    pub fn listen(&self, mut app: T::App) -> Result<Deferred<(), ConfigError>, ConfigError> {
        let state = &self.state;

        if state.port_raw == 0 || state.port_raw > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidPort(state.port_raw));
        }
        let port = state.port_raw as u16;
        if !(1..=64).contains(&state.max_body_mib) {
            return Err(ConfigError::InvalidBodySize(state.max_body_mib));
        }

        let routes = std::mem::take(&mut *state.routes.borrow_mut());
        let router = state.router.borrow_mut().take();
        match (routes.is_empty(), router.is_some()) {
            (true, false) => return Err(ConfigError::NoRoutes),
            (false, true) => return Err(ConfigError::ConflictingRouters),
            _ => {}
        }
        for route in &routes {
            if !route.path.starts_with('/') {
                return Err(ConfigError::InvalidPath(route.path.clone()));
            }
        }
        if let Some(ws) = &state.ws {
            if ws.idle_timeout_secs < MIN_WS_IDLE_TIMEOUT_SECS {
                return Err(ConfigError::WsIdleTimeoutTooSmall(ws.idle_timeout_secs));
            }
            if !ws.path.starts_with('/') {
                return Err(ConfigError::InvalidPath(ws.path.clone()));
            }
        }

        state.port.set(port);
        state
            .max_body_bytes
            .set(state.max_body_mib as usize * 1024 * 1024);

        for route in routes {
            let state = Rc::clone(state);
            let handler = route.handler;
            app.route(
                route.method,
                &route.path,
                Box::new(move |res, req| ServerState::dispatch(&state, res, req, &handler)),
            );
        }
        if let Some(handler) = router {
            let state = Rc::clone(state);
            app.route(
                RouteMethod::Any,
                "/*",
                Box::new(move |res, req| ServerState::dispatch(&state, res, req, &handler)),
            );
        }
        if let Some(ws) = &state.ws {
            let behavior = ServerState::ws_behavior(state, ws.idle_timeout_secs);
            app.ws(&ws.path, behavior);
        }

        let (deferred, settle) = Deferred::pair();
        let listen_state = Rc::clone(state);
        app.listen(
            port,
            Box::new(move |socket| match socket {
                Some(socket) => {
                    *listen_state.listen_socket.borrow_mut() = Some(socket);
                    listen_state.listening.set(true);
                    listen_state
                        .logger
                        .info("listening", &[("port", port.to_string())]);
                    settle.resolve(());
                }
                None => {
                    listen_state
                        .logger
                        .error("listen failed", &[("port", port.to_string())]);
                    settle.reject(ConfigError::ListenFailed(port));
                }
            }),
        );
        *state.app.borrow_mut() = Some(app);

        Ok(deferred)
    }

    /// Begins graceful drain: stops accepting, rejects new work, and
    /// settles the returned deferred once in-flight work finishes or the
    /// grace timer forces a close. Repeat calls return the same deferred.
    pub fn shutdown(&self, timeout_ms: u64) -> Deferred<(), HttpError> {
        let state = &self.state;
        if state.closed.get() {
            return Deferred::resolved(());
        }
        if let Some((deferred, _)) = &*state.shutdown.borrow() {
            return deferred.clone();
        }

        state.draining.set(true);
        state.logger.info(
            "draining",
            &[
                ("active_http", state.active_http.get().to_string()),
                ("active_ws", state.active_ws.get().to_string()),
            ],
        );
        if let Some(mut socket) = state.listen_socket.borrow_mut().take() {
            socket.close();
        }

        let (deferred, settle) = Deferred::pair();
        *state.shutdown.borrow_mut() = Some((deferred.clone(), settle));

        let weak = Rc::downgrade(state);
        let timer = state.app.borrow_mut().as_mut().map(|app| {
            app.set_timer(
                timeout_ms,
                Box::new(move || {
                    if let Some(state) = weak.upgrade() {
                        state.logger.warn("drain grace expired, forcing close", &[]);
                        ServerState::close_now(&state);
                    }
                }),
            )
        });
        *state.shutdown_timer.borrow_mut() = timer;

        ServerState::check_drained(state);
        deferred
    }

    /// Forces the server down: stops accepting, releases the app
    /// resource, cancels the grace timer, settles any outstanding
    /// shutdown. Idempotent.
    pub fn close(&self) {
        ServerState::close_now(&self.state);
    }

    /// Publishes to every subscriber of a topic. False when WebSocket
    /// support is disabled or the server is not listening.
    pub fn publish(&self, topic: &str, message: impl Into<WsMessage>) -> bool {
        ServerState::publish(&self.state, topic, &message.into())
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> ServerMetrics {
        let state = &self.state;
        ServerMetrics {
            active_http: state.active_http.get(),
            active_ws: state.active_ws.get(),
            pooled_http: state.http_pool.len(),
            pooled_ws: state.ws_pool.len(),
            draining: state.draining.get(),
        }
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state.listening.get() && !self.state.closed.get()
    }
}

impl<T: Transport> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.state.port.get())
            .field("draining", &self.state.draining.get())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ServerState<T> {
    // ------------------------------------------------------------------
    // HTTP dispatch
    // ------------------------------------------------------------------

    fn dispatch(state: &Rc<Self>, mut res: T::Response, req: T::Request, handler: &Handler<T>) {
        if state.draining.get() {
            reject_unavailable::<T>(&mut res);
            return;
        }

        state.active_http.set(state.active_http.get() + 1);
        let ctx = state.http_pool.acquire();
        ctx.reset(res, req, Rc::downgrade(state), state.max_body_bytes.get());

        let abort_target = Rc::clone(&ctx);
        ctx.with_response(|res| {
            res.on_aborted(Box::new(move || abort_target.on_abort()));
        });

        match handler(&ctx) {
            Ok(HandlerOutcome::Deferred(deferred)) => {
                let target = Rc::clone(&ctx);
                deferred.on_settle(move |outcome| match outcome {
                    Ok(payload) => target.on_resolve(payload),
                    Err(error) => target.on_reject(&error),
                });
                // finalize runs from the settle hooks
                return;
            }
            Ok(HandlerOutcome::Sync(payload)) => {
                if !ctx.is_replied() {
                    if let Err(error) = ctx.send(payload) {
                        ctx.send_error(&error);
                        Self::report_http_error(state, &ctx, &error);
                    }
                }
            }
            Err(error) => {
                ctx.send_error(&error);
                Self::report_http_error(state, &ctx, &error);
            }
        }

        if !ctx.is_streaming() {
            ctx.finalize();
        }
    }

    pub(crate) fn finalize_http(state: &Rc<Self>, ctx: &Rc<HttpContext<T>>) {
        state.http_pool.release(Rc::clone(ctx));
        state
            .active_http
            .set(state.active_http.get().saturating_sub(1));
        Self::check_drained(state);
    }

    pub(crate) fn report_http_error(state: &Rc<Self>, ctx: &Rc<HttpContext<T>>, error: &HttpError) {
        state.logger.error(
            "handler error",
            &[
                ("url", ctx.url()),
                ("status", error.response_status().to_string()),
                ("message", error.message().to_string()),
            ],
        );
        if let Some(hook) = &state.on_http_error {
            hook(ctx, error);
        }
    }

    // ------------------------------------------------------------------
    // WebSocket lifecycle
    // ------------------------------------------------------------------

    fn ws_behavior(state: &Rc<Self>, idle_timeout_secs: u32) -> WsBehavior<T> {
        let upgrade_state = Rc::clone(state);
        let open_state = Rc::clone(state);
        let message_state = Rc::clone(state);
        let drain_state = Rc::clone(state);
        let close_state = Rc::clone(state);
        let subscription_state = Rc::clone(state);
        WsBehavior {
            idle_timeout_secs,
            upgrade: Box::new(move |res, req| Self::handle_upgrade(&upgrade_state, res, req)),
            open: Box::new(move |ws| Self::handle_open(&open_state, ws)),
            message: Box::new(move |ws, data, binary| {
                Self::handle_message(&message_state, ws, data, binary);
            }),
            drain: Box::new(move |ws| Self::handle_drain(&drain_state, ws)),
            close: Box::new(move |ws, code, reason| {
                Self::handle_close(&close_state, ws, code, reason);
            }),
            subscription: Box::new(move |ws, topic, new_count, old_count| {
                Self::handle_subscription(&subscription_state, ws, topic, new_count, old_count);
            }),
        }
    }

    fn handle_upgrade(state: &Rc<Self>, mut res: T::Response, req: T::Request) {
        if state.draining.get() {
            reject_unavailable::<T>(&mut res);
            return;
        }
        let Some(ws) = &state.ws else { return };

        let aborted = Rc::new(Cell::new(false));
        {
            let aborted = Rc::clone(&aborted);
            res.on_aborted(Box::new(move || aborted.set(true)));
        }

        let key = req.header("sec-websocket-key").unwrap_or_default();
        let protocol = req.header("sec-websocket-protocol");
        let extensions = req.header("sec-websocket-extensions");
        let ip = res
            .proxied_remote_address()
            .unwrap_or_else(|| res.remote_address());

        let upgrade_ctx = UpgradeContext::new(req, ip, Rc::clone(&aborted));
        let outcome = match &ws.on_upgrade {
            Some(hook) => hook(&upgrade_ctx),
            None => UpgradeOutcome::Sync(UpgradeDecision::allow()),
        };

        match outcome {
            UpgradeOutcome::Sync(decision) => {
                finish_upgrade::<T>(res, decision, &key, protocol, extensions, &aborted);
            }
            UpgradeOutcome::Deferred(deferred) => {
                deferred.on_settle(move |outcome| {
                    // An empty or failed decision is a deny.
                    let decision = outcome.unwrap_or_else(|_| UpgradeDecision::deny());
                    finish_upgrade::<T>(res, decision, &key, protocol, extensions, &aborted);
                });
            }
        }
    }

    fn handle_open(state: &Rc<Self>, ws: &mut T::WebSocket) {
        if state.draining.get() {
            ws.end(1001, "Going Away");
            return;
        }
        let ctx = state.ws_pool.acquire();
        let payload = take_socket_payload::<T>(ws);
        ctx.reset(ws.clone(), Rc::downgrade(state), payload);
        set_socket_context::<T>(ws, Some(Rc::clone(&ctx)));
        state.active_ws.set(state.active_ws.get() + 1);

        if let Some(hook) = state.ws.as_ref().and_then(|ws| ws.on_open.clone()) {
            if let Err(error) = hook(&ctx) {
                Self::report_ws_error(state, &ctx, &error);
            }
        }
    }

    fn handle_message(state: &Rc<Self>, ws: &mut T::WebSocket, data: &[u8], binary: bool) {
        let Some(ctx) = socket_context::<T>(ws) else {
            return;
        };
        if let Some(hook) = state.ws.as_ref().and_then(|ws| ws.on_message.clone()) {
            if let Err(error) = hook(&ctx, WsMessage::from_frame(data, binary)) {
                Self::report_ws_error(state, &ctx, &error);
            }
        }
    }

    fn handle_drain(state: &Rc<Self>, ws: &mut T::WebSocket) {
        let Some(ctx) = socket_context::<T>(ws) else {
            return;
        };
        if let Some(hook) = state.ws.as_ref().and_then(|ws| ws.on_drain.clone()) {
            hook(&ctx);
        }
    }

    fn handle_subscription(
        state: &Rc<Self>,
        ws: &mut T::WebSocket,
        topic: &str,
        new_count: usize,
        old_count: usize,
    ) {
        let Some(ctx) = socket_context::<T>(ws) else {
            return;
        };
        if let Some(hook) = state.ws.as_ref().and_then(|ws| ws.on_subscription.clone()) {
            hook(&ctx, topic, new_count, old_count);
        }
    }

    fn handle_close(state: &Rc<Self>, ws: &mut T::WebSocket, code: u16, reason: &[u8]) {
        let Some(ctx) = socket_context::<T>(ws) else {
            return;
        };
        set_socket_context::<T>(ws, None);

        let outcome = match state.ws.as_ref().and_then(|ws| ws.on_close.clone()) {
            Some(hook) => hook(&ctx, code, reason),
            None => HookOutcome::Done,
        };
        match outcome {
            HookOutcome::Done => Self::finalize_ws(state, &ctx),
            HookOutcome::Pending(deferred) => {
                let state = Rc::clone(state);
                deferred.on_settle(move |_| Self::finalize_ws(&state, &ctx));
            }
        }
    }

    fn report_ws_error(state: &Rc<Self>, ctx: &Rc<WsContext<T>>, error: &HttpError) {
        state.logger.error(
            "websocket handler error",
            &[("message", error.message().to_string())],
        );
        if let Some(hook) = state.ws.as_ref().and_then(|ws| ws.on_error.clone()) {
            hook(ctx, error);
        }
    }

    fn finalize_ws(state: &Rc<Self>, ctx: &Rc<WsContext<T>>) {
        state.ws_pool.release(Rc::clone(ctx));
        state.active_ws.set(state.active_ws.get().saturating_sub(1));
        Self::check_drained(state);
    }

    // ------------------------------------------------------------------
    // Drain and close
    // ------------------------------------------------------------------

    fn check_drained(state: &Rc<Self>) {
        if !state.draining.get() {
            return;
        }
        if state.active_http.get() == 0 && state.active_ws.get() == 0 {
            Self::close_now(state);
        }
    }

    pub(crate) fn close_now(state: &Rc<Self>) {
        if state.closed.get() {
            return;
        }
        state.closed.set(true);
        state.draining.set(true);
        if let Some(mut socket) = state.listen_socket.borrow_mut().take() {
            socket.close();
        }
        let timer = state.shutdown_timer.borrow_mut().take();
        if let Some(timer) = timer {
            if let Some(app) = state.app.borrow_mut().as_mut() {
                app.cancel_timer(timer);
            }
        }
        if let Some(mut app) = state.app.borrow_mut().take() {
            app.close();
        }
        state.listening.set(false);
        // Clone out of the cell first: settling runs subscribers that may
        // re-enter the server.
        let settle = state.shutdown.borrow().as_ref().map(|(_, s)| s.clone());
        if let Some(settle) = settle {
            settle.resolve(());
        }
        state.logger.info("closed", &[]);
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    pub(crate) fn publish(state: &Rc<Self>, topic: &str, message: &WsMessage) -> bool {
        if state.ws.is_none() || !state.listening.get() {
            return false;
        }
        let mut app = state.app.borrow_mut();
        let Some(app) = app.as_mut() else {
            return false;
        };
        app.publish(topic, message.as_bytes(), message.is_binary())
    }
}

/// Corked `503 Service Unavailable` + `Connection: close`.
fn reject_unavailable<T: Transport>(res: &mut T::Response) {
    res.cork(&mut |res| {
        res.write_status("503 Service Unavailable");
        res.write_header("Connection", "close");
        res.end(None);
    });
}

fn finish_upgrade<T: Transport>(
    mut res: T::Response,
    decision: UpgradeDecision,
    key: &str,
    protocol: Option<String>,
    extensions: Option<String>,
    aborted: &Rc<Cell<bool>>,
) {
    if aborted.get() {
        return;
    }
    if decision.allowed {
        res.upgrade(
            WsUserData::new(decision.user_data),
            key,
            protocol.as_deref(),
            extensions.as_deref(),
        );
    } else {
        res.cork(&mut |res| {
            res.write_status("403 Forbidden");
            res.end(None);
        });
    }
}
