//! Response egress with explicit backpressure.
//!
//! [`ResponseStreamer`] owns the streamed half of a response: it emits the
//! status line and headers inside the transport's cork section, queues
//! chunks, and coordinates the writable callback so producers never run
//! ahead of the socket.
//!
//! State machine:
//!
//! ```text
//! Idle --begin--> Open --write*--> Open
//! Open --try_end(done)|end--> Closed
//! Open --abort--> Closed (no further writes)
//! ```
//!
//! `Closed` is absorbing until the next `reset`.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use gale_core::{Deferred, HttpError, ReplyHeaders, Settle};

use crate::context::HttpContext;
use crate::streaming::{Producer, ProducerEvent};
use crate::transport::{ResponseHandle, Transport};

type ArmedCallback = Box<dyn FnOnce(u64)>;

/// Writes a response: streamed replies with backpressure, and piping from
/// a producer stream.
pub struct ResponseStreamer<T: Transport> {
    ctx: RefCell<Weak<HttpContext<T>>>,
    started: Cell<bool>,
    ended: Cell<bool>,
    hook_installed: Cell<bool>,
    armed: RefCell<Option<ArmedCallback>>,
    producer: RefCell<Option<Rc<dyn Producer>>>,
    pipe_settle: RefCell<Option<Settle<(), HttpError>>>,
    paused: Cell<bool>,
}

impl<T: Transport> ResponseStreamer<T> {
    pub(crate) fn new() -> Self {
        Self {
            ctx: RefCell::new(Weak::new()),
            started: Cell::new(false),
            ended: Cell::new(false),
            hook_installed: Cell::new(false),
            armed: RefCell::new(None),
            producer: RefCell::new(None),
            pipe_settle: RefCell::new(None),
            paused: Cell::new(false),
        }
    }

    pub(crate) fn reset(&self, ctx: Weak<HttpContext<T>>) {
        *self.ctx.borrow_mut() = ctx;
        self.started.set(false);
        self.ended.set(false);
        self.hook_installed.set(false);
        *self.armed.borrow_mut() = None;
        *self.producer.borrow_mut() = None;
        *self.pipe_settle.borrow_mut() = None;
        self.paused.set(false);
    }

    pub(crate) fn clear(&self) {
        *self.ctx.borrow_mut() = Weak::new();
        self.started.set(false);
        self.ended.set(false);
        self.hook_installed.set(false);
        *self.armed.borrow_mut() = None;
        *self.producer.borrow_mut() = None;
        *self.pipe_settle.borrow_mut() = None;
        self.paused.set(false);
    }

    /// Emits the status line and headers inside the cork section and
    /// installs the transport's writable hook once.
    pub(crate) fn begin(&self, status_line: &str, headers: &ReplyHeaders) {
        let Some(ctx) = self.ctx.borrow().upgrade() else {
            return;
        };
        if ctx.is_aborted() {
            return;
        }
        ctx.with_response(|res| {
            res.cork(&mut |res| {
                res.write_status(status_line);
                write_reply_headers::<T>(res, headers);
            });
        });
        if !self.hook_installed.get() {
            let weak = self.ctx.borrow().clone();
            ctx.with_response(|res| {
                res.on_writable(Box::new(move |offset| {
                    // Single-shot delivery of the armed callback; the hook
                    // itself stays installed and reports "not handled".
                    if let Some(ctx) = weak.upgrade() {
                        if let Some(armed) = ctx.streamer().take_armed() {
                            armed(offset);
                        }
                    }
                    false
                }));
            });
            self.hook_installed.set(true);
        }
        self.started.set(true);
        self.ended.set(false);
    }

    /// Queues a chunk. False means partially queued (backpressure) or
    /// refused (not open, aborted).
    pub(crate) fn write(&self, chunk: &[u8]) -> bool {
        let Some(ctx) = self.ctx.borrow().upgrade() else {
            return false;
        };
        if ctx.is_aborted() || !self.started.get() || self.ended.get() {
            return false;
        }
        ctx.with_response(|res| res.write(chunk)).unwrap_or(false)
    }

    /// Queues the final chunk with the declared total response size.
    /// On `done == true` the streamer is closed and the context finalized.
    pub(crate) fn try_end(&self, chunk: &[u8], total_size: u64) -> (bool, bool) {
        let Some(ctx) = self.ctx.borrow().upgrade() else {
            return (false, false);
        };
        if ctx.is_aborted() || !self.started.get() || self.ended.get() {
            return (false, false);
        }
        let (ok, done) = ctx
            .with_response(|res| res.try_end(chunk, total_size))
            .unwrap_or((false, false));
        if done {
            self.finish(&ctx);
        }
        (ok, done)
    }

    /// Closes the response unconditionally and finalizes the context.
    pub(crate) fn end(&self, chunk: Option<&[u8]>) {
        let Some(ctx) = self.ctx.borrow().upgrade() else {
            return;
        };
        if ctx.is_aborted() || !self.started.get() || self.ended.get() {
            return;
        }
        ctx.with_response(|res| res.end(chunk));
        self.finish(&ctx);
    }

    /// Arms the single writable-callback slot. Arming replaces any
    /// previously armed callback.
    pub(crate) fn on_writable(&self, callback: impl FnOnce(u64) + 'static) {
        *self.armed.borrow_mut() = Some(Box::new(callback));
    }

    pub(crate) fn take_armed(&self) -> Option<ArmedCallback> {
        self.armed.borrow_mut().take()
    }

    /// Current write offset from the transport.
    pub(crate) fn write_offset(&self) -> u64 {
        self.ctx
            .borrow()
            .upgrade()
            .and_then(|ctx| ctx.with_response(|res| res.write_offset()))
            .unwrap_or(0)
    }

    /// Transport abort: drop the armed slot, destroy any producer, settle
    /// the pipe OK (the response is unrecoverable, not a pipe error).
    pub(crate) fn abort(&self) {
        *self.armed.borrow_mut() = None;
        self.paused.set(false);
        // Take before invoking: destroy/resolve deliver events that come
        // straight back into these cells.
        let producer = self.producer.borrow_mut().take();
        if let Some(producer) = producer {
            producer.destroy();
        }
        let settle = self.pipe_settle.borrow_mut().take();
        if let Some(settle) = settle {
            settle.resolve(());
        }
        self.ended.set(true);
    }

    /// Pipes a producer into the response.
    ///
    /// Backpressure ordering: a chunk whose `write` returned false is
    /// already partially queued, so the producer is paused inside the same
    /// data event and resumed only by the armed writable callback.
    pub(crate) fn stream(
        &self,
        producer: Rc<dyn Producer>,
        status_line: &str,
        headers: &ReplyHeaders,
    ) -> Deferred<(), HttpError> {
        if self.producer.borrow().is_some() {
            return Deferred::rejected(HttpError::server_error());
        }

        self.begin(status_line, headers);

        let (deferred, settle) = Deferred::pair();
        *self.pipe_settle.borrow_mut() = Some(settle.clone());
        *self.producer.borrow_mut() = Some(Rc::clone(&producer));

        let weak = self.ctx.borrow().clone();
        let source = Rc::clone(&producer);
        producer.start(Box::new(move |event| match event {
            ProducerEvent::Data(chunk) => {
                let Some(ctx) = weak.upgrade() else {
                    source.destroy();
                    settle.resolve(());
                    return;
                };
                if ctx.is_aborted() {
                    source.destroy();
                    settle.resolve(());
                    return;
                }
                let streamer = ctx.streamer();
                let ok = streamer.write(&chunk);
                if !ok && !streamer.paused.get() {
                    streamer.paused.set(true);
                    source.pause();
                    let weak = weak.clone();
                    let source = Rc::clone(&source);
                    streamer.on_writable(move |_offset| {
                        if let Some(ctx) = weak.upgrade() {
                            ctx.streamer().paused.set(false);
                        }
                        source.resume();
                    });
                }
            }
            ProducerEvent::End => {
                if let Some(ctx) = weak.upgrade() {
                    if !ctx.is_aborted() {
                        ctx.streamer().end(None);
                    }
                }
                settle.resolve(());
            }
            ProducerEvent::Error(error) => {
                if let Some(ctx) = weak.upgrade() {
                    // Streaming is over either way; end() tolerates refusal.
                    if !ctx.is_aborted() {
                        ctx.streamer().end(None);
                    }
                }
                settle.reject(error);
            }
            ProducerEvent::Close => {
                settle.resolve(());
            }
        }));

        // Drop the pipe state once settled so a later stream() is allowed.
        let weak = self.ctx.borrow().clone();
        deferred.on_settle(move |_| {
            if let Some(ctx) = weak.upgrade() {
                let streamer = ctx.streamer();
                *streamer.producer.borrow_mut() = None;
                *streamer.pipe_settle.borrow_mut() = None;
            }
        });

        deferred
    }

    fn finish(&self, ctx: &Rc<HttpContext<T>>) {
        self.ended.set(true);
        ctx.streaming_finished();
        ctx.finalize();
    }
}

pub(crate) fn write_reply_headers<T: Transport>(res: &mut T::Response, headers: &ReplyHeaders) {
    match headers {
        ReplyHeaders::Preset(preset) => {
            res.write_header("content-type", preset.content_type());
        }
        ReplyHeaders::Custom(pairs) => {
            for (name, value) in pairs {
                res.write_header(name, value);
            }
        }
        ReplyHeaders::None => {}
    }
}
