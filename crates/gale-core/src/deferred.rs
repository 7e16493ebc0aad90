//! Single-threaded one-shot completion cells.
//!
//! [`Deferred`] is the suspension primitive of the engine: body ingestion,
//! producer piping, asynchronous upgrade decisions and graceful shutdown
//! all hand out a `Deferred` that settles later from a transport callback.
//!
//! The cell is settle-once and memoizing: the first resolve or reject wins,
//! later settles are ignored, and subscribers attached after settlement
//! observe the stored outcome immediately. Subscribers run on the settling
//! call stack, which preserves the per-socket callback ordering the
//! transport guarantees.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Subscriber<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum State<T, E> {
    Pending(Vec<Subscriber<T, E>>),
    Settled(Result<T, E>),
}

/// The consumer half: attach subscribers, peek the outcome.
pub struct Deferred<T, E> {
    state: Rc<RefCell<State<T, E>>>,
}

/// The producer half: settle the cell exactly once.
pub struct Settle<T, E> {
    state: Rc<RefCell<State<T, E>>>,
}

impl<T: Clone + 'static, E: Clone + 'static> Deferred<T, E> {
    /// Creates a pending cell and its settling half.
    #[must_use]
    pub fn pair() -> (Self, Settle<T, E>) {
        let state = Rc::new(RefCell::new(State::Pending(Vec::new())));
        (
            Self {
                state: Rc::clone(&state),
            },
            Settle { state },
        )
    }

    /// A cell that is already resolved.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Settled(Ok(value)))),
        }
    }

    /// A cell that is already rejected.
    #[must_use]
    pub fn rejected(error: E) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Settled(Err(error)))),
        }
    }

    /// Runs `callback` with the outcome: immediately if settled, otherwise
    /// when the settle half fires. Each subscriber observes a clone of the
    /// same outcome.
    pub fn on_settle(&self, callback: impl FnOnce(Result<T, E>) + 'static) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(subscribers) => {
                    subscribers.push(Box::new(callback));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        // Borrow released: the subscriber may attach further subscribers.
        callback(outcome);
    }

    /// The stored outcome, if settled.
    #[must_use]
    pub fn settled(&self) -> Option<Result<T, E>> {
        match &*self.state.borrow() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Whether the cell has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), State::Settled(_))
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Settle<T, E> {
    /// Resolves the cell. Ignored if already settled.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Rejects the cell. Ignored if already settled.
    pub fn reject(&self, error: E) {
        self.settle(Err(error));
    }

    /// Whether the cell has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), State::Settled(_))
    }

    fn settle(&self, outcome: Result<T, E>) {
        let subscribers = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending(subscribers) => {
                    let subscribers = std::mem::take(subscribers);
                    *state = State::Settled(outcome.clone());
                    subscribers
                }
                State::Settled(_) => return,
            }
        };
        // Borrow released before delivery: subscribers may re-enter.
        for subscriber in subscribers {
            subscriber(outcome.clone());
        }
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T, E> Clone for Settle<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = matches!(&*self.state.borrow(), State::Settled(_));
        f.debug_struct("Deferred").field("settled", &settled).finish()
    }
}

impl<T, E> fmt::Debug for Settle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = matches!(&*self.state.borrow(), State::Settled(_));
        f.debug_struct("Settle").field("settled", &settled).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn resolve_delivers_to_prior_subscriber() {
        let (deferred, settle) = Deferred::<u32, ()>::pair();
        let seen = Rc::new(Cell::new(0u32));
        let seen2 = Rc::clone(&seen);
        deferred.on_settle(move |outcome| seen2.set(outcome.unwrap()));
        settle.resolve(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn late_subscriber_sees_memoized_outcome() {
        let (deferred, settle) = Deferred::<u32, ()>::pair();
        settle.resolve(9);
        let seen = Rc::new(Cell::new(0u32));
        let seen2 = Rc::clone(&seen);
        deferred.on_settle(move |outcome| seen2.set(outcome.unwrap()));
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn first_settle_wins() {
        let (deferred, settle) = Deferred::<u32, u32>::pair();
        settle.resolve(1);
        settle.reject(2);
        settle.resolve(3);
        assert_eq!(deferred.settled(), Some(Ok(1)));
    }

    #[test]
    fn every_subscriber_observes_same_outcome() {
        let (deferred, settle) = Deferred::<u32, ()>::pair();
        let total = Rc::new(Cell::new(0u32));
        for _ in 0..3 {
            let total = Rc::clone(&total);
            deferred.on_settle(move |outcome| total.set(total.get() + outcome.unwrap()));
        }
        settle.resolve(5);
        assert_eq!(total.get(), 15);
    }

    #[test]
    fn subscriber_may_reattach_during_delivery() {
        let (deferred, settle) = Deferred::<u32, ()>::pair();
        let seen = Rc::new(Cell::new(0u32));
        let inner_deferred = deferred.clone();
        let seen2 = Rc::clone(&seen);
        deferred.on_settle(move |_| {
            // Re-entrant subscription against the now-settled cell.
            inner_deferred.on_settle(move |outcome| seen2.set(outcome.unwrap()));
        });
        settle.resolve(4);
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn rejected_constructor_is_settled() {
        let deferred = Deferred::<(), u32>::rejected(13);
        assert_eq!(deferred.settled(), Some(Err(13)));
        assert!(deferred.is_settled());
    }
}
