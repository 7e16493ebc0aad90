//! Request body ingestion.
//!
//! [`BodyParser`] drains the transport's chunk callbacks into a single
//! contiguous buffer under a strict size limit, in one of two modes:
//!
//! - **Known mode** (content-length present): the destination buffer is
//!   pre-allocated to the exact size and each chunk is copied once at the
//!   current offset. Any overshoot, or a terminal chunk that leaves the
//!   buffer short, is a size mismatch.
//! - **Unknown mode** (no content-length): the buffer grows by powers of
//!   two from 4 KiB, clamped to the limit, and is compacted at the end
//!   when more than half the backing store would go unused.
//!
//! Ingestion is memoized: the first call attaches the data sink, repeated
//! calls observe the same sticky outcome, and a transport abort rejects
//! the pending completion.

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use bytes::Bytes;
use gale_core::{Deferred, HttpError, Settle};

use crate::context::HttpContext;
use crate::transport::{ResponseHandle, Transport};

/// Initial capacity in unknown-length mode.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Ingests raw transport chunks into one buffer, validating length.
pub struct BodyParser<T: Transport> {
    ctx: RefCell<Weak<HttpContext<T>>>,
    limit: Cell<usize>,
    deferred: RefCell<Option<Deferred<Bytes, HttpError>>>,
    settle: RefCell<Option<Settle<Bytes, HttpError>>>,
}

impl<T: Transport> BodyParser<T> {
    pub(crate) fn new() -> Self {
        Self {
            ctx: RefCell::new(Weak::new()),
            limit: Cell::new(0),
            deferred: RefCell::new(None),
            settle: RefCell::new(None),
        }
    }

    /// Prepares for a fresh ingest. Any prior terminal state is dropped.
    pub(crate) fn reset(&self, ctx: Weak<HttpContext<T>>, max_bytes: usize) {
        *self.ctx.borrow_mut() = ctx;
        self.limit.set(max_bytes);
        *self.deferred.borrow_mut() = None;
        *self.settle.borrow_mut() = None;
    }

    /// The raw body bytes.
    ///
    /// Memoized: the first call attaches the data sink; later calls return
    /// the same outcome.
    pub fn body(&self) -> Deferred<Bytes, HttpError> {
        if let Some(existing) = &*self.deferred.borrow() {
            return existing.clone();
        }
        let (deferred, settle) = Deferred::pair();
        *self.deferred.borrow_mut() = Some(deferred.clone());
        *self.settle.borrow_mut() = Some(settle.clone());
        self.ingest(&settle);
        deferred
    }

    /// The body decoded as UTF-8. An empty body yields the empty string.
    pub fn text(&self) -> Deferred<String, HttpError> {
        let (deferred, settle) = Deferred::pair();
        self.body().on_settle(move |outcome| match outcome {
            Ok(bytes) => settle.resolve(String::from_utf8_lossy(&bytes).into_owned()),
            Err(error) => settle.reject(error),
        });
        deferred
    }

    /// The body parsed as JSON. An empty body yields `null`.
    pub fn json(&self) -> Deferred<serde_json::Value, HttpError> {
        let (deferred, settle) = Deferred::pair();
        self.body().on_settle(move |outcome| match outcome {
            Ok(bytes) if bytes.is_empty() => settle.resolve(serde_json::Value::Null),
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => settle.resolve(value),
                Err(_) => settle.reject(HttpError::invalid_json()),
            },
            Err(error) => settle.reject(error),
        });
        deferred
    }

    /// Rejects the pending completion if ingestion has not finished.
    pub(crate) fn abort(&self) {
        // Clone out of the cell: rejection runs subscribers that may
        // finalize the context and clear this parser.
        let settle = self.settle.borrow().clone();
        if let Some(settle) = settle {
            settle.reject(HttpError::aborted());
        }
    }

    /// Releases the owning-context reference; unusable until the next reset.
    pub(crate) fn clear(&self) {
        *self.ctx.borrow_mut() = Weak::new();
        self.limit.set(0);
        *self.deferred.borrow_mut() = None;
        *self.settle.borrow_mut() = None;
    }

    fn ingest(&self, settle: &Settle<Bytes, HttpError>) {
        let Some(ctx) = self.ctx.borrow().upgrade() else {
            settle.reject(HttpError::server_error());
            return;
        };
        if ctx.is_aborted() {
            settle.reject(HttpError::aborted());
            return;
        }

        let limit = self.limit.get();
        match ctx.content_length() {
            Some(expected) if expected > limit => {
                settle.reject(HttpError::body_too_large());
            }
            Some(0) => {
                ctx.with_response(|res| res.on_data(Box::new(|_, _| {})));
                settle.resolve(Bytes::new());
            }
            Some(expected) => {
                let sink = known_mode_sink(self.ctx.borrow().clone(), settle.clone(), expected);
                ctx.with_response(|res| res.on_data(sink));
            }
            None => {
                let sink = unknown_mode_sink(self.ctx.borrow().clone(), settle.clone(), limit);
                ctx.with_response(|res| res.on_data(sink));
            }
        }
    }
}

fn known_mode_sink<T: Transport>(
    ctx: Weak<HttpContext<T>>,
    settle: Settle<Bytes, HttpError>,
    expected: usize,
) -> Box<dyn FnMut(&[u8], bool)> {
    let mut buf: Vec<u8> = Vec::with_capacity(expected);
    Box::new(move |chunk, is_last| {
        if settle.is_settled() {
            return;
        }
        if observed_abort(&ctx) {
            settle.reject(HttpError::aborted());
            return;
        }
        if buf.len() + chunk.len() > expected {
            settle.reject(HttpError::size_mismatch());
            return;
        }
        buf.extend_from_slice(chunk);
        if is_last {
            if buf.len() == expected {
                settle.resolve(Bytes::from(std::mem::take(&mut buf)));
            } else {
                settle.reject(HttpError::size_mismatch());
            }
        }
    })
}

fn unknown_mode_sink<T: Transport>(
    ctx: Weak<HttpContext<T>>,
    settle: Settle<Bytes, HttpError>,
    limit: usize,
) -> Box<dyn FnMut(&[u8], bool)> {
    let mut buf: Vec<u8> = Vec::new();
    Box::new(move |chunk, is_last| {
        if settle.is_settled() {
            return;
        }
        if observed_abort(&ctx) {
            settle.reject(HttpError::aborted());
            return;
        }
        let needed = buf.len() + chunk.len();
        if needed > limit {
            settle.reject(HttpError::body_too_large());
            return;
        }
        grow_for(&mut buf, needed, limit);
        buf.extend_from_slice(chunk);
        if is_last {
            // Short bodies should not retain a large backing store.
            if buf.capacity() > buf.len() * 2 {
                buf.shrink_to_fit();
            }
            settle.resolve(Bytes::from(std::mem::take(&mut buf)));
        }
    })
}

fn observed_abort<T: Transport>(ctx: &Weak<HttpContext<T>>) -> bool {
    ctx.upgrade().map_or(true, |ctx| ctx.is_aborted())
}

/// Grows `buf` to hold `needed` bytes: power-of-two steps from
/// [`INITIAL_CAPACITY`], clamped to `limit`. `needed` must not exceed
/// `limit`.
fn grow_for(buf: &mut Vec<u8>, needed: usize, limit: usize) {
    if buf.capacity() >= needed {
        return;
    }
    let mut target = buf.capacity().max(INITIAL_CAPACITY);
    while target < needed {
        target = target.saturating_mul(2);
    }
    let target = target.min(limit);
    buf.reserve_exact(target - buf.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRequest, MockResponse, MockTransport};
    use gale_core::{ErrorKind, Pool};
    use proptest::prelude::*;
    use std::rc::Rc;

    const LIMIT: usize = 1024 * 1024;

    fn bound_ctx(
        req: MockRequest,
    ) -> (
        Rc<Pool<HttpContext<MockTransport>>>,
        Rc<HttpContext<MockTransport>>,
        MockResponse,
    ) {
        let pool = Pool::new(8, HttpContext::with_pool);
        let ctx = pool.acquire();
        let res = MockResponse::new();
        ctx.reset(res.clone(), req, Weak::new(), LIMIT);
        (pool, ctx, res)
    }

    fn kind_of(outcome: Option<Result<Bytes, HttpError>>) -> ErrorKind {
        outcome
            .expect("terminal outcome")
            .expect_err("expected an error")
            .kind()
    }

    #[test]
    fn growth_starts_at_initial_capacity() {
        let mut buf = Vec::new();
        grow_for(&mut buf, 1, 1 << 20);
        assert!(buf.capacity() >= INITIAL_CAPACITY);
    }

    #[test]
    fn growth_doubles_to_need() {
        let mut buf = Vec::new();
        grow_for(&mut buf, 9 * 1024, 1 << 20);
        assert!(buf.capacity() >= 16 * 1024);
    }

    #[test]
    fn growth_clamps_to_limit() {
        let limit = 10 * 1024;
        let mut buf = Vec::new();
        grow_for(&mut buf, 9 * 1024, limit);
        assert!(buf.capacity() <= limit);
        assert!(buf.capacity() >= 9 * 1024);
    }

    #[test]
    fn known_mode_reassembles_chunks() {
        let req = MockRequest::new("POST", "/x").header("content-length", "10");
        let (_pool, ctx, res) = bound_ctx(req);
        let body = ctx.body();
        res.deliver_data(b"0123", false);
        res.deliver_data(b"45678", false);
        res.deliver_data(b"9", true);
        assert_eq!(body.settled(), Some(Ok(Bytes::from_static(b"0123456789"))));
    }

    #[test]
    fn known_mode_overshoot_is_size_mismatch() {
        let req = MockRequest::new("POST", "/x").header("content-length", "4");
        let (_pool, ctx, res) = bound_ctx(req);
        let body = ctx.body();
        res.deliver_data(b"12345", true);
        assert_eq!(kind_of(body.settled()), ErrorKind::SizeMismatch);
    }

    #[test]
    fn known_mode_short_terminal_is_size_mismatch() {
        let req = MockRequest::new("POST", "/x").header("content-length", "8");
        let (_pool, ctx, res) = bound_ctx(req);
        let body = ctx.body();
        res.deliver_data(b"123", true);
        assert_eq!(kind_of(body.settled()), ErrorKind::SizeMismatch);
    }

    #[test]
    fn zero_content_length_completes_empty_with_noop_sink() {
        let req = MockRequest::new("POST", "/x").header("content-length", "0");
        let (_pool, ctx, res) = bound_ctx(req);
        let body = ctx.body();
        assert_eq!(body.settled(), Some(Ok(Bytes::new())));
        // the installed sink swallows whatever still arrives
        res.deliver_data(b"stray", true);
        assert_eq!(body.settled(), Some(Ok(Bytes::new())));
    }

    #[test]
    fn declared_length_over_limit_rejects_before_ingest() {
        let req =
            MockRequest::new("POST", "/x").header("content-length", &(LIMIT + 1).to_string());
        let (_pool, ctx, _res) = bound_ctx(req);
        assert_eq!(kind_of(ctx.body().settled()), ErrorKind::BodyTooLarge);
    }

    #[test]
    fn unknown_mode_accumulates_until_terminal() {
        let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
        let body = ctx.body();
        res.deliver_data(b"ab", false);
        res.deliver_data(b"cd", false);
        res.deliver_data(b"", true);
        assert_eq!(body.settled(), Some(Ok(Bytes::from_static(b"abcd"))));
    }

    #[test]
    fn unknown_mode_exactly_limit_is_accepted() {
        let pool = Pool::new(8, HttpContext::<MockTransport>::with_pool);
        let ctx = pool.acquire();
        let res = MockResponse::new();
        ctx.reset(res.clone(), MockRequest::new("POST", "/x"), Weak::new(), 8);
        let body = ctx.body();
        res.deliver_data(b"12345678", true);
        assert_eq!(body.settled(), Some(Ok(Bytes::from_static(b"12345678"))));
    }

    #[test]
    fn unknown_mode_limit_plus_one_rejects() {
        let pool = Pool::new(8, HttpContext::<MockTransport>::with_pool);
        let ctx = pool.acquire();
        let res = MockResponse::new();
        ctx.reset(res.clone(), MockRequest::new("POST", "/x"), Weak::new(), 8);
        let body = ctx.body();
        res.deliver_data(b"12345678", false);
        res.deliver_data(b"9", true);
        assert_eq!(kind_of(body.settled()), ErrorKind::BodyTooLarge);
    }

    #[test]
    fn outcome_is_memoized_across_calls() {
        let req = MockRequest::new("POST", "/x").header("content-length", "2");
        let (_pool, ctx, res) = bound_ctx(req);
        let first = ctx.body();
        res.deliver_data(b"ok", true);
        let second = ctx.body();
        assert_eq!(first.settled(), second.settled());
    }

    #[test]
    fn text_decodes_utf8_and_empty_is_empty_string() {
        let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
        let text = ctx.text();
        res.deliver_data("héllo".as_bytes(), true);
        assert_eq!(text.settled(), Some(Ok("héllo".to_string())));

        let req = MockRequest::new("POST", "/y").header("content-length", "0");
        let (_pool, ctx, _res) = bound_ctx(req);
        assert_eq!(ctx.text().settled(), Some(Ok(String::new())));
    }

    #[test]
    fn json_parses_and_empty_is_null() {
        let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
        let json = ctx.json();
        res.deliver_data(br#"{"name":"Ada"}"#, true);
        assert_eq!(
            json.settled(),
            Some(Ok(serde_json::json!({"name": "Ada"})))
        );

        let req = MockRequest::new("POST", "/y").header("content-length", "0");
        let (_pool, ctx, _res) = bound_ctx(req);
        assert_eq!(ctx.json().settled(), Some(Ok(serde_json::Value::Null)));
    }

    #[test]
    fn invalid_json_rejects_with_invalid_json() {
        let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
        let json = ctx.json();
        res.deliver_data(b"{invalid json}", true);
        assert_eq!(
            json.settled().unwrap().unwrap_err(),
            HttpError::invalid_json()
        );
    }

    #[test]
    fn abort_before_ingest_rejects_immediately() {
        let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
        res.trigger_abort();
        ctx.on_abort();
        assert_eq!(kind_of(ctx.body().settled()), ErrorKind::Aborted);
    }

    #[test]
    fn abort_mid_ingest_rejects_pending_completion() {
        let req = MockRequest::new("POST", "/x").header("content-length", "10");
        let (_pool, ctx, res) = bound_ctx(req);
        let body = ctx.body();
        res.deliver_data(b"12345", false);
        ctx.on_abort();
        assert_eq!(kind_of(body.settled()), ErrorKind::Aborted);
        // further chunks are ignored
        res.deliver_data(b"67890", true);
        assert_eq!(kind_of(body.settled()), ErrorKind::Aborted);
    }

    proptest! {
        #[test]
        fn known_mode_round_trips_any_chunking(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            splits in proptest::collection::vec(1usize..64, 0..32),
        ) {
            let req = MockRequest::new("POST", "/x")
                .header("content-length", &data.len().to_string());
            let (_pool, ctx, res) = bound_ctx(req);
            let body = ctx.body();

            let mut offset = 0;
            for split in splits {
                if offset >= data.len() {
                    break;
                }
                let end = (offset + split).min(data.len());
                res.deliver_data(&data[offset..end], false);
                offset = end;
            }
            res.deliver_data(&data[offset..], true);

            if data.is_empty() {
                // zero content-length short-circuits before the sink
                prop_assert_eq!(body.settled(), Some(Ok(Bytes::new())));
            } else {
                prop_assert_eq!(body.settled(), Some(Ok(Bytes::from(data))));
            }
        }

        #[test]
        fn unknown_mode_round_trips_any_chunking(
            data in proptest::collection::vec(any::<u8>(), 1..2048),
            splits in proptest::collection::vec(1usize..64, 0..32),
        ) {
            let (_pool, ctx, res) = bound_ctx(MockRequest::new("POST", "/x"));
            let body = ctx.body();

            let mut offset = 0;
            for split in splits {
                if offset >= data.len() {
                    break;
                }
                let end = (offset + split).min(data.len());
                res.deliver_data(&data[offset..end], false);
                offset = end;
            }
            res.deliver_data(&data[offset..], true);

            prop_assert_eq!(body.settled(), Some(Ok(Bytes::from(data))));
        }
    }
}
