//! The per-request context.
//!
//! [`HttpContext`] is the pooled object bound to one `(response, request)`
//! pair for the lifetime of a request. It caches request identity, owns
//! the [`BodyParser`] and [`ResponseStreamer`], drives the reply-versus-
//! stream state machine, and carries the lifecycle hooks the server and
//! the transport dispatch into.
//!
//! Context-level states:
//!
//! ```text
//! Fresh --reset--> Bound
//! Bound --reply--> Replied --finalize--> Done
//! Bound --start_streaming--> Streaming --end/try_end(done)--> Replied --finalize--> Done
//! Bound --abort--> Done (aborted)
//! ```
//!
//! Once `aborted` is set it never reverts and every write is a silent
//! no-op. `finalize` is sticky: the `done` flag survives release to the
//! pool so a stray late callback cannot finalize twice.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bytes::Bytes;
use gale_core::status::status_line as canonical_line;
use gale_core::{Deferred, HeaderPreset, HttpError, Payload, Pool, Recycle, ReplyHeaders};
use serde::Serialize;

use crate::body::BodyParser;
use crate::server::ServerState;
use crate::streamer::ResponseStreamer;
use crate::streaming::Producer;
use crate::transport::{RequestHandle, ResponseHandle, Transport};

/// A route parameter selector: positional or by name.
#[derive(Debug, Clone, Copy)]
pub enum ParamKey<'a> {
    /// Positional, in route-pattern order.
    Index(usize),
    /// By `:name`.
    Name(&'a str),
}

impl From<usize> for ParamKey<'static> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for ParamKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

/// What a handler hands back to the dispatcher.
pub enum HandlerOutcome {
    /// A value to send now (or nothing, if the handler already replied).
    Sync(Payload),
    /// A completion that settles later with the value or an error.
    Deferred(Deferred<Payload, HttpError>),
}

impl From<Payload> for HandlerOutcome {
    fn from(payload: Payload) -> Self {
        Self::Sync(payload)
    }
}

impl From<()> for HandlerOutcome {
    fn from((): ()) -> Self {
        Self::Sync(Payload::None)
    }
}

impl From<&str> for HandlerOutcome {
    fn from(text: &str) -> Self {
        Self::Sync(Payload::from(text))
    }
}

impl From<String> for HandlerOutcome {
    fn from(text: String) -> Self {
        Self::Sync(Payload::from(text))
    }
}

impl From<serde_json::Value> for HandlerOutcome {
    fn from(value: serde_json::Value) -> Self {
        Self::Sync(Payload::from(value))
    }
}

impl From<Deferred<Payload, HttpError>> for HandlerOutcome {
    fn from(deferred: Deferred<Payload, HttpError>) -> Self {
        Self::Deferred(deferred)
    }
}

/// A request handler. Returning `Err` is the synchronous-throw path.
pub type Handler<T> = Rc<dyn Fn(&HttpContext<T>) -> Result<HandlerOutcome, HttpError>>;

/// The per-request context. Recycled through a [`Pool`].
pub struct HttpContext<T: Transport> {
    weak_self: Weak<Self>,
    pool: Weak<Pool<Self>>,
    res: RefCell<Option<T::Response>>,
    req: RefCell<Option<T::Request>>,
    server: RefCell<Weak<ServerState<T>>>,

    ip: RefCell<Option<String>>,
    method: RefCell<Option<String>>,
    url: RefCell<Option<String>>,
    content_length: Cell<Option<Option<usize>>>,

    status_override: Cell<Option<u16>>,
    replied: Cell<bool>,
    streaming: Cell<bool>,
    streaming_started: Cell<bool>,
    aborted: Cell<bool>,
    done: Cell<bool>,

    body: BodyParser<T>,
    streamer: ResponseStreamer<T>,
}

impl<T: Transport> HttpContext<T> {
    /// Builds a fresh context owned by `pool`. Used as the pool factory.
    pub fn with_pool(pool: &Rc<Pool<Self>>) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            pool: Rc::downgrade(pool),
            res: RefCell::new(None),
            req: RefCell::new(None),
            server: RefCell::new(Weak::new()),
            ip: RefCell::new(None),
            method: RefCell::new(None),
            url: RefCell::new(None),
            content_length: Cell::new(None),
            status_override: Cell::new(None),
            replied: Cell::new(false),
            streaming: Cell::new(false),
            streaming_started: Cell::new(false),
            aborted: Cell::new(false),
            done: Cell::new(false),
            body: BodyParser::new(),
            streamer: ResponseStreamer::new(),
        })
    }

    /// Rebinds the context to a fresh `(response, request)` pair and
    /// clears all per-request state, including the `done` latch.
    pub(crate) fn reset(
        &self,
        res: T::Response,
        req: T::Request,
        server: Weak<ServerState<T>>,
        max_body_bytes: usize,
    ) {
        *self.res.borrow_mut() = Some(res);
        *self.req.borrow_mut() = Some(req);
        *self.server.borrow_mut() = server;
        *self.ip.borrow_mut() = None;
        *self.method.borrow_mut() = None;
        *self.url.borrow_mut() = None;
        self.content_length.set(None);
        self.status_override.set(None);
        self.replied.set(false);
        self.streaming.set(false);
        self.streaming_started.set(false);
        self.aborted.set(false);
        self.done.set(false);
        self.body.reset(self.weak_self.clone(), max_body_bytes);
        self.streamer.reset(self.weak_self.clone());
    }

    /// A strong handle for stashing across a deferred completion.
    #[must_use]
    pub fn handle(&self) -> Rc<Self> {
        self.weak_self.upgrade().expect("context outlives its borrow")
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Client IP, proxy-reported when available. Cached.
    pub fn ip(&self) -> String {
        if let Some(ip) = &*self.ip.borrow() {
            return ip.clone();
        }
        let ip = self
            .with_response(|res| {
                res.proxied_remote_address()
                    .unwrap_or_else(|| res.remote_address())
            })
            .unwrap_or_default();
        *self.ip.borrow_mut() = Some(ip.clone());
        ip
    }

    /// Request method, lowercase. Cached.
    pub fn method(&self) -> String {
        if let Some(method) = &*self.method.borrow() {
            return method.clone();
        }
        let method = self
            .with_request(|req| req.method().to_ascii_lowercase())
            .unwrap_or_default();
        *self.method.borrow_mut() = Some(method.clone());
        method
    }

    /// Request URL. Cached.
    pub fn url(&self) -> String {
        if let Some(url) = &*self.url.borrow() {
            return url.clone();
        }
        let url = self.with_request(RequestHandle::url).unwrap_or_default();
        *self.url.borrow_mut() = Some(url.clone());
        url
    }

    /// A request header by lowercase name.
    pub fn header(&self, name: &str) -> Option<String> {
        self.with_request(|req| req.header(name)).flatten()
    }

    /// A query-string value by key.
    pub fn query(&self, name: &str) -> Option<String> {
        self.with_request(|req| req.query(name)).flatten()
    }

    /// A route parameter, by index or by name.
    pub fn param<'a>(&self, key: impl Into<ParamKey<'a>>) -> Option<String> {
        match key.into() {
            ParamKey::Index(index) => self.with_request(|req| req.parameter(index)).flatten(),
            ParamKey::Name(name) => self
                .with_request(|req| req.parameter_by_name(name))
                .flatten(),
        }
    }

    /// Declared content length, parsed lazily. `None` is the unknown
    /// sentinel (absent or unparseable header).
    pub fn content_length(&self) -> Option<usize> {
        if let Some(cached) = self.content_length.get() {
            return cached;
        }
        let parsed = self
            .with_request(|req| req.header("content-length"))
            .flatten()
            .and_then(|value| value.trim().parse::<usize>().ok());
        self.content_length.set(Some(parsed));
        parsed
    }

    // ------------------------------------------------------------------
    // Status and headers
    // ------------------------------------------------------------------

    /// Overrides the numeric status applied on the next write.
    pub fn status(&self, code: u16) {
        self.status_override.set(Some(code));
    }

    /// The canonical status line: override if set, else `fallback`,
    /// else 500.
    #[must_use]
    pub fn status_line(&self, fallback: Option<u16>) -> &'static str {
        canonical_line(self.status_override.get().or(fallback).unwrap_or(500))
    }

    /// Writes a header to the transport. Refused once the reply latch is
    /// taken.
    pub fn set_header(&self, name: &str, value: &str) {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return;
        }
        self.with_response(|res| res.write_header(name, value));
    }

    /// Writes a header set: one of the frozen presets (fast path) or a
    /// custom list.
    pub fn set_headers(&self, headers: &ReplyHeaders) {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return;
        }
        self.with_response(|res| crate::streamer::write_reply_headers::<T>(res, headers));
    }

    // ------------------------------------------------------------------
    // Body ingress
    // ------------------------------------------------------------------

    /// The raw body bytes. Memoized per request.
    pub fn body(&self) -> Deferred<Bytes, HttpError> {
        self.body.body()
    }

    /// Alias of [`body`](Self::body).
    pub fn buffer(&self) -> Deferred<Bytes, HttpError> {
        self.body.body()
    }

    /// The body decoded as UTF-8.
    pub fn text(&self) -> Deferred<String, HttpError> {
        self.body.text()
    }

    /// The body parsed as JSON.
    pub fn json(&self) -> Deferred<serde_json::Value, HttpError> {
        self.body.json()
    }

    // ------------------------------------------------------------------
    // One-shot reply
    // ------------------------------------------------------------------

    /// Emits status, headers and body in one cork section. Takes the
    /// reply latch; a second reply is a no-op.
    pub fn reply(&self, status: u16, headers: &ReplyHeaders, body: Option<&[u8]>) -> bool {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return false;
        }
        let line = canonical_line(status);
        let wrote = self
            .with_response(|res| {
                res.cork(&mut |res| {
                    res.write_status(line);
                    crate::streamer::write_reply_headers::<T>(res, headers);
                    res.end(body);
                });
            })
            .is_some();
        if wrote {
            self.replied.set(true);
        }
        wrote
    }

    /// Sends a value, dispatching status and content type by shape.
    /// The status override, if set, wins over the shape default.
    ///
    /// # Errors
    ///
    /// Returns the serialization error so the caller can fall back to
    /// [`send_error`](Self::send_error).
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), HttpError> {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return Ok(());
        }
        let payload = payload.into();
        let status = self
            .status_override
            .get()
            .unwrap_or_else(|| payload.default_status());
        let preset = payload.preset();
        let body = payload.into_body()?;
        self.reply(status, &ReplyHeaders::Preset(preset), Some(&body));
        Ok(())
    }

    /// Serializes a value as JSON and sends it with the json preset.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn send_json<S: Serialize>(&self, value: &S) -> Result<(), HttpError> {
        self.send(Payload::json(value)?)
    }

    /// Sends plain text.
    pub fn send_text(&self, text: &str) {
        // Text cannot fail serialization.
        let _ = self.send(Payload::from(text));
    }

    /// Sends raw bytes with the octet-stream preset.
    pub fn send_buffer(&self, bytes: Bytes) {
        let _ = self.send(Payload::Bytes(bytes));
    }

    /// Sends an error reply: the error's mapped status and its message as
    /// plain text. Out-of-table statuses collapse to 500.
    pub fn send_error(&self, error: &HttpError) {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return;
        }
        self.reply(
            error.response_status(),
            &ReplyHeaders::Preset(HeaderPreset::TextPlain),
            Some(error.response_message().as_bytes()),
        );
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Opens the streamed path: emits status and headers, takes the reply
    /// latch and enters the streaming substate.
    pub fn start_streaming(&self, status: u16, headers: &ReplyHeaders) -> bool {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return false;
        }
        let code = self.status_override.get().unwrap_or(status);
        self.streamer.begin(canonical_line(code), headers);
        self.replied.set(true);
        self.streaming.set(true);
        true
    }

    /// Queues a chunk on the streamed path. False outside streaming or
    /// under backpressure.
    pub fn write(&self, chunk: &[u8]) -> bool {
        if !self.streaming.get() {
            return false;
        }
        self.streaming_started.set(true);
        self.streamer.write(chunk)
    }

    /// Queues the final chunk with the declared total size; `(ok, done)`.
    pub fn try_end(&self, chunk: &[u8], total_size: u64) -> (bool, bool) {
        if !self.streaming.get() {
            return (false, false);
        }
        self.streamer.try_end(chunk, total_size)
    }

    /// Closes the streamed response.
    pub fn end(&self, chunk: Option<&[u8]>) {
        if !self.streaming.get() {
            return;
        }
        self.streamer.end(chunk);
    }

    /// Arms the one-shot writable callback.
    pub fn on_writable(&self, callback: impl FnOnce(u64) + 'static) {
        self.streamer.on_writable(callback);
    }

    /// Current write offset from the transport.
    pub fn write_offset(&self) -> u64 {
        self.streamer.write_offset()
    }

    /// Pipes a producer into the response. Takes the reply latch.
    pub fn stream(
        &self,
        producer: Rc<dyn Producer>,
        status: u16,
        headers: &ReplyHeaders,
    ) -> Deferred<(), HttpError> {
        if self.replied.get() || self.aborted.get() || self.done.get() {
            return Deferred::rejected(HttpError::server_error());
        }
        let code = self.status_override.get().unwrap_or(status);
        self.replied.set(true);
        self.streaming.set(true);
        self.streamer.stream(producer, canonical_line(code), headers)
    }

    // ------------------------------------------------------------------
    // Lifecycle hooks
    // ------------------------------------------------------------------

    /// Transport abort: latches `aborted`, rejects pending body work,
    /// tears down the streamer, finalizes.
    pub fn on_abort(&self) {
        self.aborted.set(true);
        self.body.abort();
        self.streamer.abort();
        self.finalize();
    }

    /// One-shot: marks the request done and returns the context to its
    /// owner. Re-entry is ignored.
    pub fn finalize(&self) {
        if self.done.get() {
            return;
        }
        self.done.set(true);
        let server = self.server.borrow().upgrade();
        if let Some(server) = server {
            if let Some(this) = self.weak_self.upgrade() {
                ServerState::finalize_http(&server, &this);
            }
        } else if let (Some(pool), Some(this)) = (self.pool.upgrade(), self.weak_self.upgrade()) {
            pool.release(this);
        }
    }

    /// Deferred completion: sends the value if the request is still open,
    /// then finalizes unless streaming.
    pub fn on_resolve(&self, payload: Payload) {
        if !self.done.get() && !self.aborted.get() && !self.replied.get() {
            if let Err(error) = self.send(payload) {
                self.send_error(&error);
                self.report_error(&error);
            }
        }
        if !self.streaming.get() {
            self.finalize();
        }
    }

    /// Deferred rejection: sends the error reply if the request is still
    /// open, reports it, then finalizes unless streaming.
    pub fn on_reject(&self, error: &HttpError) {
        if !self.done.get() && !self.aborted.get() && !self.replied.get() {
            self.send_error(error);
        }
        self.report_error(error);
        if !self.streaming.get() {
            self.finalize();
        }
    }

    // ------------------------------------------------------------------
    // State flags
    // ------------------------------------------------------------------

    /// Whether the transport signalled an abort.
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    /// Whether the reply latch is taken.
    pub fn is_replied(&self) -> bool {
        self.replied.get()
    }

    /// Whether the streamed path is open.
    pub fn is_streaming(&self) -> bool {
        self.streaming.get()
    }

    /// Whether at least one streamed chunk was sent.
    pub fn streaming_started(&self) -> bool {
        self.streaming_started.get()
    }

    /// Whether finalize already ran.
    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Whether the context still holds its transport handles.
    pub fn is_bound(&self) -> bool {
        self.res.borrow().is_some() || self.req.borrow().is_some()
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    pub(crate) fn with_response<R>(&self, f: impl FnOnce(&mut T::Response) -> R) -> Option<R> {
        self.res.borrow_mut().as_mut().map(f)
    }

    fn with_request<R>(&self, f: impl FnOnce(&T::Request) -> R) -> Option<R> {
        self.req.borrow().as_ref().map(f)
    }

    pub(crate) fn streamer(&self) -> &ResponseStreamer<T> {
        &self.streamer
    }

    pub(crate) fn streaming_finished(&self) {
        self.streaming.set(false);
    }

    fn report_error(&self, error: &HttpError) {
        let server = self.server.borrow().upgrade();
        if let Some(server) = server {
            if let Some(this) = self.weak_self.upgrade() {
                ServerState::report_http_error(&server, &this, error);
            }
        }
    }
}

impl<T: Transport> Recycle for HttpContext<T> {
    fn clear(&self) {
        *self.res.borrow_mut() = None;
        *self.req.borrow_mut() = None;
        *self.server.borrow_mut() = Weak::new();
        *self.ip.borrow_mut() = None;
        *self.method.borrow_mut() = None;
        *self.url.borrow_mut() = None;
        self.content_length.set(None);
        self.status_override.set(None);
        self.body.clear();
        self.streamer.clear();
        // `done` (and `aborted`) survive until the next reset so stray
        // callbacks find a finished context.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ChunkedProducer;
    use crate::testing::{MockRequest, MockResponse, MockTransport};
    use std::cell::Cell;

    fn bound_ctx(
        req: MockRequest,
        res: MockResponse,
    ) -> (
        Rc<Pool<HttpContext<MockTransport>>>,
        Rc<HttpContext<MockTransport>>,
    ) {
        let pool = Pool::new(8, HttpContext::with_pool);
        let ctx = pool.acquire();
        ctx.reset(res, req, Weak::new(), 1024 * 1024);
        (pool, ctx)
    }

    #[test]
    fn send_none_is_204_text_plain_empty() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send(Payload::None).unwrap();
        assert_eq!(res.status().as_deref(), Some("204 No Content"));
        assert_eq!(
            res.header("content-type").as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert!(res.body_bytes().is_empty());
    }

    #[test]
    fn send_text_is_200_text_plain() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send("hello").unwrap();
        assert_eq!(res.status().as_deref(), Some("200 OK"));
        assert_eq!(
            res.header("content-type").as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(res.body_str(), "hello");
    }

    #[test]
    fn send_bytes_is_200_octet_stream() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send(Payload::Bytes(bytes::Bytes::from_static(b"\x01\x02"))).unwrap();
        assert_eq!(res.status().as_deref(), Some("200 OK"));
        assert_eq!(
            res.header("content-type").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(res.body_bytes(), vec![1, 2]);
    }

    #[test]
    fn send_json_is_200_json_preset() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send(serde_json::json!({"ok": true})).unwrap();
        assert_eq!(res.status().as_deref(), Some("200 OK"));
        assert_eq!(
            res.header("content-type").as_deref(),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(res.body_str(), r#"{"ok":true}"#);
    }

    #[test]
    fn status_override_wins_over_shape_default() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("POST", "/x"), res.clone());
        ctx.status(201);
        ctx.send("created").unwrap();
        assert_eq!(res.status().as_deref(), Some("201 Created"));
    }

    #[test]
    fn status_line_prefers_override_then_fallback_then_500() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res);
        assert_eq!(ctx.status_line(None), "500 Internal Server Error");
        assert_eq!(ctx.status_line(Some(404)), "404 Not Found");
        ctx.status(201);
        assert_eq!(ctx.status_line(Some(404)), "201 Created");
    }

    #[test]
    fn out_of_table_override_falls_back_to_500() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.status(299);
        ctx.send("whatever").unwrap();
        assert_eq!(res.status().as_deref(), Some("500 Internal Server Error"));
    }

    #[test]
    fn second_reply_is_a_silent_no_op() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send("first").unwrap();
        ctx.send("second").unwrap();
        assert_eq!(res.body_str(), "first");
        assert_eq!(res.cork_count(), 1);
    }

    #[test]
    fn set_header_after_reply_is_refused() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.set_header("x-early", "1");
        ctx.send("done").unwrap();
        ctx.set_header("x-late", "1");
        assert!(res.header("x-early").is_some());
        assert!(res.header("x-late").is_none());
    }

    #[test]
    fn abort_before_first_byte_leaves_wire_untouched() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.on_abort();
        ctx.send("anything").unwrap();
        assert!(!ctx.start_streaming(200, &ReplyHeaders::None));
        assert!(!ctx.write(b"chunk"));
        assert_eq!(ctx.try_end(b"chunk", 5), (false, false));
        assert!(res.status().is_none());
        assert!(res.body_bytes().is_empty());
    }

    #[test]
    fn finalize_runs_once_and_returns_context_to_pool() {
        let res = MockResponse::new();
        let (pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res);
        ctx.finalize();
        ctx.finalize();
        assert!(ctx.is_done());
        assert!(!ctx.is_bound());
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&ctx));
    }

    #[test]
    fn done_survives_release_until_reset() {
        let res = MockResponse::new();
        let (pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res);
        ctx.finalize();
        assert!(ctx.is_done());
        let again = pool.acquire();
        assert!(Rc::ptr_eq(&again, &ctx));
        assert!(again.is_done());
        again.reset(
            MockResponse::new(),
            MockRequest::new("GET", "/y"),
            Weak::new(),
            1024,
        );
        assert!(!again.is_done());
    }

    #[test]
    fn identity_accessors_cache_and_normalize() {
        let res = MockResponse::new().with_remote("10.0.0.9");
        let req = MockRequest::new("POST", "/users/42")
            .header("content-length", "3")
            .query_param("q", "x");
        let (_pool, ctx) = bound_ctx(req, res);
        assert_eq!(ctx.method(), "post");
        assert_eq!(ctx.url(), "/users/42");
        assert_eq!(ctx.ip(), "10.0.0.9");
        assert_eq!(ctx.content_length(), Some(3));
        assert_eq!(ctx.query("q").as_deref(), Some("x"));
        assert_eq!(ctx.query("missing"), None);
    }

    #[test]
    fn proxied_address_wins_over_remote() {
        let res = MockResponse::new()
            .with_remote("10.0.0.9")
            .with_proxied_remote("203.0.113.7");
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res);
        assert_eq!(ctx.ip(), "203.0.113.7");
    }

    #[test]
    fn invalid_content_length_is_unknown() {
        let req = MockRequest::new("POST", "/x").header("content-length", "nope");
        let (_pool, ctx) = bound_ctx(req, MockResponse::new());
        assert_eq!(ctx.content_length(), None);
    }

    #[test]
    fn send_error_writes_status_and_message() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send_error(&HttpError::body_too_large());
        assert_eq!(res.status().as_deref(), Some("413 Payload Too Large"));
        assert_eq!(res.body_str(), "Request body too large");
        assert_eq!(
            res.header("content-type").as_deref(),
            Some("text/plain; charset=utf-8")
        );
    }

    #[test]
    fn streamed_reply_writes_chunks_in_order() {
        let res = MockResponse::new();
        let (pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        assert!(ctx.start_streaming(200, &ReplyHeaders::Preset(HeaderPreset::TextPlain)));
        assert!(ctx.write(b"one "));
        assert!(ctx.write(b"two "));
        let (ok, done) = ctx.try_end(b"three", 13);
        assert!(ok);
        assert!(done);
        assert_eq!(res.status().as_deref(), Some("200 OK"));
        assert_eq!(res.body_str(), "one two three");
        assert!(res.is_ended());
        assert!(ctx.is_done());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn writable_arming_is_single_shot() {
        let res = MockResponse::new().with_write_capacity(4);
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.start_streaming(200, &ReplyHeaders::None);
        assert!(!ctx.write(b"123456"));

        let fired = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&fired);
        ctx.on_writable(move |_offset| counter.set(counter.get() + 1));
        res.drain_writable();
        res.drain_writable();
        assert_eq!(fired.get(), 1);
        // the transport hook stays installed for the next arming
        assert!(res.has_writable_hook());
    }

    #[test]
    fn pipe_honors_backpressure_and_preserves_order() {
        let res = MockResponse::new().with_write_capacity(16);
        let (pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        let data: Vec<u8> = (0..200u8).collect();
        let producer = Rc::new(ChunkedProducer::new(data.clone(), 10));
        let piped = ctx.stream(
            producer,
            200,
            &ReplyHeaders::Preset(HeaderPreset::OctetStream),
        );

        let mut guard = 0;
        while !piped.is_settled() {
            res.drain_writable();
            guard += 1;
            assert!(guard < 100, "pipe did not complete");
        }
        assert_eq!(piped.settled(), Some(Ok(())));
        assert_eq!(res.body_bytes(), data);
        assert!(res.is_ended());
        assert!(ctx.is_done());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pipe_abort_destroys_producer_and_settles_ok() {
        let res = MockResponse::new().with_write_capacity(4);
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        let producer = Rc::new(ChunkedProducer::new(vec![7u8; 64], 8));
        let piped = ctx.stream(producer, 200, &ReplyHeaders::None);
        assert!(!piped.is_settled());
        ctx.on_abort();
        assert_eq!(piped.settled(), Some(Ok(())));
        assert!(ctx.is_done());
    }

    #[test]
    fn concurrent_pipe_is_rejected() {
        let res = MockResponse::new().with_write_capacity(4);
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        let first = ctx.stream(Rc::new(ChunkedProducer::new(vec![1u8; 64], 8)), 200, &ReplyHeaders::None);
        assert!(!first.is_settled());
        let second = ctx.stream(Rc::new(ChunkedProducer::new(vec![2u8; 8], 8)), 200, &ReplyHeaders::None);
        assert_eq!(
            second.settled(),
            Some(Err(HttpError::server_error()))
        );
    }

    #[test]
    fn deferred_resolution_sends_and_finalizes() {
        let res = MockResponse::new();
        let (pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        let (deferred, settle) = Deferred::<Payload, HttpError>::pair();
        let target = ctx.handle();
        deferred.on_settle(move |outcome| match outcome {
            Ok(payload) => target.on_resolve(payload),
            Err(error) => target.on_reject(&error),
        });
        assert!(!ctx.is_done());
        settle.resolve(Payload::from("late"));
        assert_eq!(res.body_str(), "late");
        assert!(ctx.is_done());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn deferred_rejection_sends_error_reply() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.on_reject(&HttpError::custom(422, "bad shape"));
        assert_eq!(res.status().as_deref(), Some("422 Unprocessable Entity"));
        assert_eq!(res.body_str(), "bad shape");
    }

    #[test]
    fn resolve_after_reply_does_not_send_again() {
        let res = MockResponse::new();
        let (_pool, ctx) = bound_ctx(MockRequest::new("GET", "/x"), res.clone());
        ctx.send("handler sent this").unwrap();
        ctx.on_resolve(Payload::from("late value"));
        assert_eq!(res.body_str(), "handler sent this");
        assert!(ctx.is_done());
    }
}
