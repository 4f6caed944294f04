//! Storage for the coroutine bodies the dispatcher drives.
//!
//! A coroutine body is just a boxed, pinned, type-erased `Future<Output = ()>`:
//! all of the value-producing behavior lives in what the future does to the
//! `Rc<RefCell<..>>` cells it closes over (a `Promise`, a `Generator`, ...)
//! before it finishes. The scheduler itself only knows how to store and poll
//! these futures by id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::id::CoId;

pub(crate) type CoroutineBody = Pin<Box<dyn Future<Output = ()>>>;

#[derive(Default)]
pub(crate) struct Scheduler {
    coroutines: HashMap<CoId, CoroutineBody>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: CoId, body: CoroutineBody) {
        self.coroutines.insert(id, body);
    }

    /// Removes `id`'s future from storage so it can be polled with no borrow
    /// of the scheduler held. Pair with [`Scheduler::put_back`] after polling.
    ///
    /// This take/poll/put-back split is what makes it sound for a coroutine
    /// body to reentrantly drive the same dispatcher while it itself is being
    /// polled (e.g. a `then` callback calling `Generator::next`, or an async
    /// body calling `AsyncScope::spawn`): the scheduler is never borrowed
    /// across a `poll()` call, only ever across the short removal or
    /// reinsertion either side of it.
    pub fn take(&mut self, id: CoId) -> Option<CoroutineBody> {
        self.coroutines.remove(&id)
    }

    pub fn put_back(&mut self, id: CoId, body: CoroutineBody) {
        self.coroutines.insert(id, body);
    }
}
