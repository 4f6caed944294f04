//! The single-threaded, cooperatively-scheduled event loop.
//!
//! Grounded on the teacher's `executor/mod.rs` (the `tick`/`tick_until_empty`
//! split between "run what's ready right now" and "drain until nothing is
//! left") and on `async.c`'s `upromise_dispatcher_run`/`run_immediately`
//! pair, which this crate's `run_until_idle`/`run_immediately` mirror.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::Context;
use std::task::Poll;

use std::cell::RefCell;

use crate::id::{CoId, CoIds};
use crate::scheduler::{CoroutineBody, Scheduler};
use crate::task_queue::TaskQueue;

struct Inner {
    scheduler: RefCell<Scheduler>,
    queue: RefCell<TaskQueue>,
    ids: RefCell<CoIds>,
}

/// A handle to one event loop: a task queue plus the coroutines it drives.
///
/// Cloning a `Dispatcher` is cheap (an `Rc` clone) and gives you another
/// handle to the *same* loop — there is exactly one task queue and one
/// scheduler per `Dispatcher::new()` call. `Dispatcher` carries no `V`/`E`
/// type parameters: it only ever manipulates type-erased coroutine bodies
/// and plain [`CoId`] values, matching the spec's own description of the
/// dispatcher as blind to promise/generator payload types.
#[derive(Clone)]
pub struct Dispatcher(Rc<Inner>);

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher(Rc::new(Inner {
            scheduler: RefCell::new(Scheduler::new()),
            queue: RefCell::new(TaskQueue::new()),
            ids: RefCell::new(CoIds::new()),
        }))
    }

    pub(crate) fn reserve_id(&self) -> CoId {
        self.0.ids.borrow_mut().allocate()
    }

    pub(crate) fn register(&self, id: CoId, body: CoroutineBody) {
        self.0.scheduler.borrow_mut().insert(id, body);
    }

    pub(crate) fn push_tail(&self, id: CoId) {
        self.0.queue.borrow_mut().push_tail(id);
    }

    pub(crate) fn push_head(&self, id: CoId) {
        self.0.queue.borrow_mut().push_head(id);
    }

    /// Moves every task in `waiters` onto the tail of the dispatcher queue,
    /// preserving `waiters`'s own order. Used when a promise settles to hand
    /// its waiters over to the dispatcher in registration order.
    pub(crate) fn splice_tail(&self, waiters: TaskQueue) {
        self.0.queue.borrow_mut().extend_from(waiters);
    }

    /// Resumes a single coroutine: take its future out of the scheduler, poll
    /// it with no scheduler borrow held, then put it back if still pending or
    /// free its id if it completed.
    fn resume_one(&self, id: CoId) {
        let Some(mut body) = self.0.scheduler.borrow_mut().take(id) else {
            tracing::trace!(?id, "resume of unknown or already-completed coroutine, ignoring");
            return;
        };
        let waker = crate::waker::create();
        let mut cx = Context::from_waker(&waker);
        tracing::trace!(?id, "resuming coroutine");
        match Pin::new(&mut body).as_mut().poll(&mut cx) {
            Poll::Pending => {
                self.0.scheduler.borrow_mut().put_back(id, body);
            }
            Poll::Ready(()) => {
                tracing::trace!(?id, "coroutine completed");
                self.0.ids.borrow_mut().free(id);
            }
        }
    }

    /// Drains the task queue completely, resuming whatever coroutine each
    /// task names. This is the operation a host event loop calls between
    /// external events (the spec's top-level "run").
    pub fn run_until_idle(&self) {
        let _span = tracing::trace_span!("run_until_idle").entered();
        loop {
            let Some(id) = self.0.queue.borrow_mut().pop_head() else {
                break;
            };
            self.resume_one(id);
        }
    }

    /// Pushes `co` to the head of the queue, then pumps the queue until `co`
    /// itself has been resumed exactly once. Used by every synchronous-looking
    /// re-entry point: `Generator::next`/`return_`/`throw`, `AsyncGenerator`'s
    /// scheduling, and `Dispatcher::spawn_async` when called from outside a
    /// running coroutine.
    pub(crate) fn run_immediately(&self, co: CoId) {
        self.0.queue.borrow_mut().push_head(co);
        loop {
            let Some(id) = self.0.queue.borrow_mut().pop_head() else {
                break;
            };
            let is_target = id == co;
            self.resume_one(id);
            if is_target {
                break;
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.0.queue.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    #[test]
    fn run_until_idle_drains_fifo() {
        let dispatcher = Dispatcher::new();
        let order = StdRc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let id = dispatcher.reserve_id();
            let order = order.clone();
            dispatcher.register(
                id,
                Box::pin(async move {
                    order.borrow_mut().push(i);
                }),
            );
            dispatcher.push_tail(id);
        }

        dispatcher.run_until_idle();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn run_immediately_returns_after_target_resumed_once() {
        let dispatcher = Dispatcher::new();
        let ran = StdRc::new(Cell::new(false));

        let id = dispatcher.reserve_id();
        let ran_inner = ran.clone();
        dispatcher.register(
            id,
            Box::pin(async move {
                ran_inner.set(true);
            }),
        );

        dispatcher.run_immediately(id);
        assert!(ran.get());
    }
}
