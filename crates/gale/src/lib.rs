//! High-throughput HTTP/1.1 and WebSocket server core.
//!
//! gale is the request/response engine that sits directly atop a
//! non-blocking event-driven socket layer:
//!
//! - **Declarative routing** — method/path routes or a universal router,
//!   forwarded verbatim to the transport's native router
//! - **Pooled per-request contexts** — no per-request allocation on the
//!   hot path
//! - **Bounded body parsing** — known- and unknown-length modes with
//!   strict limits and no extra copies
//! - **Streamed responses** — framed writes, `try_end`, and explicit
//!   writable-callback backpressure
//! - **Cooperative cancellation** — transport aborts silence every
//!   later write and finalize exactly once
//! - **Graceful drain** — in-flight work completes, new work is turned
//!   away, a grace timer bounds the wait
//!
//! # Quick Start
//!
//! ```ignore
//! use gale::{HandlerOutcome, Payload, Route, RouteMethod, Server, ServerOptions};
//!
//! let server = Server::new(ServerOptions {
//!     port: 6000,
//!     routes: vec![Route::new(RouteMethod::Get, "/", |_ctx| {
//!         Ok(HandlerOutcome::Sync(Payload::from("Hello, World!")))
//!     })],
//!     ..ServerOptions::default()
//! });
//! server.listen(transport_app)?;
//! ```
//!
//! # Crate Structure
//!
//! - [`gale_core`](core) — status table, presets, errors, deferreds, pools
//! - [`gale_http`](http) — contexts, body parser, streamer, server

#![forbid(unsafe_code)]

// Re-export crates
pub use gale_core as core;
pub use gale_http as http;

// Re-export the surface handlers touch constantly
pub use gale_core::{
    is_known_status, status_line, ConfigError, Deferred, ErrorKind, HeaderPreset, HttpError,
    LogConfig, LogLevel, Logger, Payload, Pool, Recycle, ReplyHeaders, Settle,
};
pub use gale_http::{
    AppHandle, BodyParser, ChunkedProducer, Handler, HandlerOutcome, HookOutcome, HttpContext,
    ListenSocketHandle, ParamKey, Producer, ProducerEvent, RequestHandle, ResponseHandle,
    ResponseStreamer, Route, RouteMethod, Server, ServerMetrics, ServerOptions, Transport,
    UpgradeContext, UpgradeDecision, UpgradeOutcome, WebSocketHandle, WsBehavior, WsContext,
    WsError, WsMessage, WsOptions, WsUserData,
};
