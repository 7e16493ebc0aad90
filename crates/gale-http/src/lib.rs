//! The gale request/response engine.
//!
//! This crate sits directly atop a non-blocking event-driven socket layer
//! (the transport) and provides:
//!
//! - [`HttpContext`]: the pooled per-request context with one-shot and
//!   streamed reply paths, lazy identity caching, and cooperative
//!   cancellation
//! - [`BodyParser`]: bounded body ingestion in known- and unknown-length
//!   modes
//! - [`ResponseStreamer`]: framed writes, `try_end`, writable-callback
//!   backpressure, and producer piping
//! - [`WsContext`]: the pooled per-connection WebSocket context
//! - [`Server`]: route registration, dispatch, active-request tracking,
//!   graceful drain and forced close
//!
//! # Design Principles
//!
//! - Single-threaded cooperative execution per event loop; shard at the
//!   listen-socket level for parallelism
//! - Contexts are recycled, not reallocated
//! - The transport, HTTP/1.1 parser and WebSocket handshake are external
//!   collaborators behind the [`transport`] trait seam

#![forbid(unsafe_code)]
// Pedantic clippy lints allowed (style suggestions, not correctness issues)
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::single_match_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::type_complexity)]
#![allow(clippy::cast_possible_truncation)]

pub mod body;
pub mod context;
pub mod server;
pub mod streamer;
pub mod streaming;
pub mod testing;
pub mod transport;
pub mod websocket;

pub use body::BodyParser;
pub use context::{Handler, HandlerOutcome, HttpContext, ParamKey};
pub use server::{
    Route, Server, ServerMetrics, ServerOptions, WsOptions, DEFAULT_MAX_BODY_MIB, DEFAULT_PORT,
    DEFAULT_WS_IDLE_TIMEOUT_SECS, MIN_WS_IDLE_TIMEOUT_SECS,
};
pub use streamer::ResponseStreamer;
pub use streaming::{ChunkedProducer, Producer, ProducerEvent, DEFAULT_CHUNK_SIZE};
pub use transport::{
    AppHandle, ListenSocketHandle, RequestHandle, ResponseHandle, RouteMethod, Transport,
    WebSocketHandle, WsBehavior, WsUserData,
};
pub use websocket::{
    HookOutcome, UpgradeContext, UpgradeDecision, UpgradeOutcome, WsContext, WsError, WsMessage,
};

// Re-export the core types handlers touch constantly.
pub use gale_core::{
    ConfigError, Deferred, ErrorKind, HeaderPreset, HttpError, LogConfig, LogLevel, Payload,
    ReplyHeaders, Settle,
};
