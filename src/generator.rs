//! The synchronous `generator`: a coroutine that produces values via `yield`
//! and is pulled with `next`/`return_`/`throw`.
//!
//! Grounded on `original_source/src/async.c`'s `upromise_generator_*` family.
//! Unlike [`crate::promise::Promise`] and [`crate::async_await`], a generator
//! is driven synchronously from the caller's point of view: `next` doesn't
//! return a promise, it runs the dispatcher just far enough to produce one
//! value and hands it back directly, via [`Dispatcher::run_immediately`].

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::coro_state::CoroState;
use crate::dispatcher::Dispatcher;
use crate::id::CoId;

struct Inner<V, E> {
    dispatcher: Dispatcher,
    co: CoId,
    done: bool,
    need_done: bool,
    set_data: Option<V>,
    data: Option<V>,
    error: Option<E>,
}

/// A pull-driven producer of `V`s, optionally terminating with an `E`.
///
/// Cloning shares the same underlying coroutine and state (see `SPEC_FULL.md`
/// §9 on standardizing every handle in this crate on a single shared model).
pub struct Generator<V, E>(Rc<RefCell<Inner<V, E>>>);

impl<V, E> Clone for Generator<V, E> {
    fn clone(&self) -> Self {
        Generator(Rc::clone(&self.0))
    }
}

/// What a suspended `yield` is resumed with: either the value the consumer
/// passed to `next`, or a request to stop (from `return_`/`throw`).
///
/// The Rust realization of the source's `YIELD` macro, whose hidden
/// "if `need_done` then return immediately" check has no non-local-return
/// equivalent here — a generator body is written to `match` on this and
/// `return` explicitly on `Stop`.
#[derive(Debug)]
pub enum Resumption<V> {
    Value(V),
    Stop,
}

/// The result of one `next`/`return_`/`throw` pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorResult<V, E> {
    pub done: bool,
    pub data: Option<V>,
    pub error: Option<E>,
}

/// Passed into a generator body; lets it `yield_value` back to the driver.
pub struct GenScope<V, E> {
    gen: Generator<V, E>,
}

impl<V, E> Clone for GenScope<V, E> {
    fn clone(&self) -> Self {
        GenScope {
            gen: self.gen.clone(),
        }
    }
}

impl<V, E> GenScope<V, E>
where
    V: Clone + 'static,
{
    pub fn yield_value(&self, datum: V) -> YieldFuture<V, E> {
        YieldFuture {
            state: CoroState::Running,
            gen: self.gen.clone(),
            datum: Some(datum),
        }
    }
}

#[must_use = "futures do nothing unless polled by the dispatcher"]
pub struct YieldFuture<V, E> {
    state: CoroState,
    gen: Generator<V, E>,
    datum: Option<V>,
}

impl<V, E> Future for YieldFuture<V, E>
where
    V: Clone + 'static,
{
    type Output = Resumption<V>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            CoroState::Running => {
                self.state = CoroState::Halted;
                let datum = self.datum.take().expect("YieldFuture polled twice before resuming");
                self.gen.0.borrow_mut().data = Some(datum);
                Poll::Pending
            }
            CoroState::Halted => {
                let mut inner = self.gen.0.borrow_mut();
                let need_done = std::mem::take(&mut inner.need_done);
                let resumed = inner.set_data.take();
                drop(inner);
                Poll::Ready(if need_done {
                    Resumption::Stop
                } else {
                    Resumption::Value(resumed.expect("yield resumed with no value and no stop request"))
                })
            }
        }
    }
}

impl<V, E> Generator<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Allocates a generator with a fresh coroutine, but does not start it —
    /// the body only runs once `next`/`return_`/`throw` is first called.
    pub fn new<F, Fut>(dispatcher: &Dispatcher, body: F) -> Self
    where
        F: FnOnce(GenScope<V, E>) -> Fut + 'static,
        Fut: Future<Output = V> + 'static,
    {
        let co = dispatcher.reserve_id();
        let gen = Generator(Rc::new(RefCell::new(Inner {
            dispatcher: dispatcher.clone(),
            co,
            done: false,
            need_done: false,
            set_data: None,
            data: None,
            error: None,
        })));
        let scope = GenScope { gen: gen.clone() };
        let fut = body(scope);
        let gen_for_body = gen.clone();
        let wrapped = async move {
            let result = fut.await;
            let mut inner = gen_for_body.0.borrow_mut();
            inner.done = true;
            inner.data = Some(result);
        };
        dispatcher.register(co, Box::pin(wrapped));
        gen
    }

    fn drive(&self) -> GeneratorResult<V, E> {
        let (done, co, dispatcher) = {
            let inner = self.0.borrow();
            (inner.done, inner.co, inner.dispatcher.clone())
        };
        if !done {
            dispatcher.run_immediately(co);
        }
        let mut inner = self.0.borrow_mut();
        GeneratorResult {
            done: inner.done,
            data: inner.data.take(),
            error: inner.error.take(),
        }
    }

    /// Resumes the body, delivering `v` to whatever `yield` it's currently
    /// suspended at, and returns the next produced value (or the final
    /// `{done: true, ..}` result once the body has returned).
    pub fn next(&self, v: V) -> GeneratorResult<V, E> {
        if !self.0.borrow().done {
            self.0.borrow_mut().set_data = Some(v);
        }
        self.drive()
    }

    /// Asks the body to stop at its next `yield`, then overwrites the
    /// returned data with `v` (mirroring the source's `return(g, v)`).
    pub fn return_(&self, v: V) -> GeneratorResult<V, E> {
        self.0.borrow_mut().need_done = true;
        let mut result = self.drive();
        result.data = Some(v);
        result
    }

    /// Asks the body to stop at its next `yield`, then overwrites the
    /// returned error with `e`.
    pub fn throw(&self, e: E) -> GeneratorResult<V, E> {
        self.0.borrow_mut().need_done = true;
        let mut result = self.drive();
        result.error = Some(e);
        result
    }

    pub fn is_done(&self) -> bool {
        self.0.borrow().done
    }
}
