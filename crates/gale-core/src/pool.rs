//! LIFO object pools for context recycling.
//!
//! The engine allocates two context objects per connection class and reuses
//! them across requests. The pool pops most-recently-released first for
//! cache locality and tracks membership by allocation identity so the same
//! object cannot be pushed twice from two release paths.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// An object the pool can recycle.
pub trait Recycle {
    /// Drops per-request state. Runs on every release, before retention.
    fn clear(&self);
}

type Factory<T> = Box<dyn Fn(&Rc<Pool<T>>) -> Rc<T>>;

/// A LIFO cache of reusable objects.
pub struct Pool<T: Recycle> {
    max: usize,
    factory: Factory<T>,
    entries: RefCell<Vec<Rc<T>>>,
    present: RefCell<HashSet<usize>>,
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool retaining at most `max` objects.
    ///
    /// The factory runs on a cache miss and receives the pool itself so the
    /// object can hold a back-reference for release.
    pub fn new(max: usize, factory: impl Fn(&Rc<Pool<T>>) -> Rc<T> + 'static) -> Rc<Self> {
        Rc::new(Self {
            max,
            factory: Box::new(factory),
            entries: RefCell::new(Vec::new()),
            present: RefCell::new(HashSet::new()),
        })
    }

    /// Pops the most recently released object, or builds a fresh one.
    #[must_use]
    pub fn acquire(self: &Rc<Self>) -> Rc<T> {
        let popped = self.entries.borrow_mut().pop();
        match popped {
            Some(object) => {
                self.present.borrow_mut().remove(&identity(&object));
                object
            }
            None => (self.factory)(self),
        }
    }

    /// Clears the object and retains it if there is room.
    ///
    /// A second release of an object already retained is ignored. With
    /// `max == 0` the object is cleared but never retained.
    pub fn release(&self, object: Rc<T>) {
        object.clear();
        if self.max == 0 {
            return;
        }
        let id = identity(&object);
        if self.present.borrow().contains(&id) {
            return;
        }
        let mut entries = self.entries.borrow_mut();
        if entries.len() < self.max {
            entries.push(object);
            self.present.borrow_mut().insert(id);
        }
    }

    /// Drops every retained object.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.present.borrow_mut().clear();
    }

    /// Number of retained objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the pool retains nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Whether this exact object is currently retained.
    #[must_use]
    pub fn contains(&self, object: &Rc<T>) -> bool {
        self.present.borrow().contains(&identity(object))
    }
}

fn identity<T>(object: &Rc<T>) -> usize {
    Rc::as_ptr(object) as usize
}
