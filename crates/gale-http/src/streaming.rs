//! Producer streams for piped responses.
//!
//! A [`Producer`] is the readable side of [`stream`](crate::context::HttpContext::stream):
//! an event-driven chunk source that honors pause/resume so the streamer
//! can enforce backpressure. The engine never polls a producer; the
//! producer pushes events into the observer installed by `start` and must
//! stop pushing while paused.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use gale_core::HttpError;

/// Default chunk size for in-memory producers (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// An event pushed by a producer.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// A chunk of data.
    Data(Bytes),
    /// The source is exhausted.
    End,
    /// The source failed.
    Error(HttpError),
    /// The source is gone; no further events follow.
    Close,
}

/// An event-driven chunk source with backpressure.
pub trait Producer: 'static {
    /// Installs the observer and begins emitting. Emission may happen
    /// synchronously inside this call, so implementations use interior
    /// mutability: the observer is allowed to call back into
    /// `pause`/`destroy` while a chunk is being delivered.
    fn start(&self, observer: Box<dyn FnMut(ProducerEvent)>);

    /// Stops emission until [`resume`](Self::resume). The chunk currently
    /// being delivered is not affected.
    fn pause(&self);

    /// Resumes emission after a pause.
    fn resume(&self);

    /// Tears the source down; at most a final `Close` follows.
    fn destroy(&self);
}

struct ChunkedState {
    data: Vec<u8>,
    position: usize,
    chunk_size: usize,
    paused: bool,
    destroyed: bool,
    pumping: bool,
    observer: Option<Box<dyn FnMut(ProducerEvent)>>,
}

/// A producer that yields chunks from an in-memory buffer.
///
/// Useful for testing and for streaming pre-loaded data in chunks.
pub struct ChunkedProducer {
    state: Rc<RefCell<ChunkedState>>,
}

impl ChunkedProducer {
    /// A producer over `data` emitting `chunk_size`-byte chunks.
    #[must_use]
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChunkedState {
                data,
                position: 0,
                chunk_size: chunk_size.max(1),
                paused: false,
                destroyed: false,
                pumping: false,
                observer: None,
            })),
        }
    }

    /// A producer with the default chunk size.
    #[must_use]
    pub fn with_default_chunks(data: Vec<u8>) -> Self {
        Self::new(data, DEFAULT_CHUNK_SIZE)
    }

    /// Remaining bytes not yet emitted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let state = self.state.borrow();
        state.data.len().saturating_sub(state.position)
    }

    fn pump(state: &Rc<RefCell<ChunkedState>>) {
        // Guard against re-entrant resume() from inside an observer.
        {
            let mut inner = state.borrow_mut();
            if inner.pumping {
                return;
            }
            inner.pumping = true;
        }

        loop {
            // Decide the next event under a short borrow, deliver outside it:
            // the observer may call pause/destroy back into this producer.
            let (event, observer) = {
                let mut inner = state.borrow_mut();
                if inner.destroyed {
                    inner.pumping = false;
                    return;
                }
                if inner.paused {
                    inner.pumping = false;
                    return;
                }
                let Some(observer) = inner.observer.take() else {
                    inner.pumping = false;
                    return;
                };
                if inner.position >= inner.data.len() {
                    (None, observer)
                } else {
                    let end = (inner.position + inner.chunk_size).min(inner.data.len());
                    let chunk = Bytes::copy_from_slice(&inner.data[inner.position..end]);
                    inner.position = end;
                    (Some(chunk), observer)
                }
            };

            let mut observer = observer;
            match event {
                Some(chunk) => {
                    observer(ProducerEvent::Data(chunk));
                    state.borrow_mut().observer = Some(observer);
                }
                None => {
                    observer(ProducerEvent::End);
                    observer(ProducerEvent::Close);
                    let mut inner = state.borrow_mut();
                    inner.destroyed = true;
                    inner.pumping = false;
                    return;
                }
            }
        }
    }
}

impl Producer for ChunkedProducer {
    fn start(&self, observer: Box<dyn FnMut(ProducerEvent)>) {
        self.state.borrow_mut().observer = Some(observer);
        Self::pump(&self.state);
    }

    fn pause(&self) {
        self.state.borrow_mut().paused = true;
    }

    fn resume(&self) {
        {
            let mut inner = self.state.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.paused = false;
        }
        Self::pump(&self.state);
    }

    fn destroy(&self) {
        let observer = {
            let mut inner = self.state.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.observer.take()
        };
        if let Some(mut observer) = observer {
            observer(ProducerEvent::Close);
        }
    }
}
