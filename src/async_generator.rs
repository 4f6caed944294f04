//! The `async-generator`: a queued producer whose `yield` accepts a promise
//! and whose consumers receive settled results as promises, with
//! `next`/`return_`/`throw` serialized against in-flight yields.
//!
//! Grounded on `original_source/src/async.c`'s `upromise_agen_*` family.
//!
//! This port resolves one ambiguity in the source left open by
//! `SPEC_FULL.md` §4.6: rather than chaining each new request onto the
//! *previous* request's settlement via an extra `then` registered at request
//! time (the source's `agen_schedule` dance), [`AsyncGenerator::try_schedule`]
//! is called directly, either immediately (the request queue was empty) or
//! from inside the pending-queue-draining reaction that runs when the
//! currently-serviced request's yielded promise settles. The two are
//! observationally identical — "wait for the prior request to settle, then
//! schedule the next" is exactly what "schedule the new front once the
//! current front is popped" already does — but this avoids building a second,
//! redundant promise-chain purely to sequence scheduling. See `DESIGN.md`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::coro_state::CoroState;
use crate::dispatcher::Dispatcher;
use crate::id::CoId;
use crate::promise::{Promise, Rejection};

/// One pulled item: either a produced value, or the terminal `{done: true}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AGenItem<V> {
    pub done: bool,
    pub value: Option<V>,
}

/// What a suspended `yield_value` is resumed with.
#[derive(Debug)]
pub enum AGenResumption<V, E> {
    Value(V),
    Stop,
    Throw(E),
}

enum RequestKind<V, E> {
    Next(V),
    Return,
    Throw(E),
}

struct PendingRequest<V, E> {
    kind: RequestKind<V, E>,
    result: Promise<AGenItem<V>, E>,
}

struct Inner<V, E> {
    dispatcher: Dispatcher,
    co: CoId,
    done: bool,
    need_done: bool,
    /// Set once termination was *requested* (by `return_`/`throw`, or by a
    /// yielded promise rejecting) rather than reached by the body returning
    /// on its own — in that case the terminal item's `value` is `None`
    /// regardless of what the body's `Result` happened to carry, mirroring
    /// `Generator::return_`/`throw`'s "overwrite the returned data" behavior.
    force_stop: bool,
    error_override: Option<E>,
    set_data: Option<V>,
    pending: VecDeque<PendingRequest<V, E>>,
}

/// A queued, promise-returning pull iterator.
pub struct AsyncGenerator<V, E>(Rc<RefCell<Inner<V, E>>>);

impl<V, E> Clone for AsyncGenerator<V, E> {
    fn clone(&self) -> Self {
        AsyncGenerator(Rc::clone(&self.0))
    }
}

/// Passed into an async-generator body; lets it `yield_value` a promise back
/// to the driver.
pub struct AGenScope<V, E> {
    agen: AsyncGenerator<V, E>,
}

impl<V, E> Clone for AGenScope<V, E> {
    fn clone(&self) -> Self {
        AGenScope {
            agen: self.agen.clone(),
        }
    }
}

impl<V, E> AGenScope<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    pub fn yield_value(&self, q: &Promise<V, E>) -> AGenYieldFuture<V, E> {
        AGenYieldFuture {
            state: CoroState::Running,
            agen: self.agen.clone(),
            promise: q.clone(),
        }
    }
}

#[must_use = "futures do nothing unless polled by the dispatcher"]
pub struct AGenYieldFuture<V, E> {
    state: CoroState,
    agen: AsyncGenerator<V, E>,
    promise: Promise<V, E>,
}

impl<V, E> Future for AGenYieldFuture<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = AGenResumption<V, E>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            CoroState::Running => {
                self.state = CoroState::Halted;
                let agen = self.agen.clone();
                self.promise
                    .on_settle_result(move |result| agen.on_yield_settled(result));
                Poll::Pending
            }
            CoroState::Halted => {
                let mut inner = self.agen.0.borrow_mut();
                let need_done = std::mem::take(&mut inner.need_done);
                let error = inner.error_override.take();
                let data = inner.set_data.take();
                drop(inner);
                Poll::Ready(match error {
                    Some(e) => AGenResumption::Throw(e),
                    None if need_done => AGenResumption::Stop,
                    None => {
                        AGenResumption::Value(data.expect("yield resumed with no value and no stop request"))
                    }
                })
            }
        }
    }
}

impl<V, E> AsyncGenerator<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Allocates an async-generator with a fresh coroutine, but does not
    /// start it — the body only runs once `next`/`return_`/`throw` is first
    /// called, matching `Generator::new`.
    pub fn new<F, Fut>(dispatcher: &Dispatcher, body: F) -> Self
    where
        F: FnOnce(AGenScope<V, E>) -> Fut + 'static,
        Fut: Future<Output = Result<V, Rejection<E>>> + 'static,
    {
        let co = dispatcher.reserve_id();
        let agen = AsyncGenerator(Rc::new(RefCell::new(Inner {
            dispatcher: dispatcher.clone(),
            co,
            done: false,
            need_done: false,
            force_stop: false,
            error_override: None,
            set_data: None,
            pending: VecDeque::new(),
        })));
        let scope = AGenScope { agen: agen.clone() };
        let fut = body(scope);
        let agen_for_body = agen.clone();
        let wrapped = async move {
            let outcome = fut.await;
            let (remaining, force_stop) = {
                let mut inner = agen_for_body.0.borrow_mut();
                inner.done = true;
                (std::mem::take(&mut inner.pending), inner.force_stop)
            };
            for entry in remaining {
                match &outcome {
                    Ok(v) => {
                        let value = if force_stop { None } else { Some(v.clone()) };
                        entry.result.resolve(AGenItem { done: true, value });
                    }
                    Err(rejection) => entry.result.settle(Err(rejection.clone())),
                }
            }
        };
        dispatcher.register(co, Box::pin(wrapped));
        agen
    }

    fn dispatcher(&self) -> Dispatcher {
        self.0.borrow().dispatcher.clone()
    }

    fn request(&self, kind: RequestKind<V, E>) -> Promise<AGenItem<V>, E> {
        let dispatcher = self.dispatcher();
        if self.0.borrow().done {
            return Promise::resolved(&dispatcher, AGenItem { done: true, value: None });
        }
        let result = Promise::pending(&dispatcher);
        let was_empty = self.0.borrow().pending.is_empty();
        self.0.borrow_mut().pending.push_back(PendingRequest {
            kind,
            result: result.clone(),
        });
        if was_empty {
            self.try_schedule();
        }
        result
    }

    /// Writes the front pending request's resume data onto the coroutine's
    /// state, then resumes it to deliver that data at its currently
    /// suspended `yield_value` (or to start it, the first time).
    fn try_schedule(&self) {
        let (co, dispatcher) = {
            let mut inner = self.0.borrow_mut();
            let (data, need_done, error, force_stop) = match &inner
                .pending
                .front()
                .expect("try_schedule called with an empty pending queue")
                .kind
            {
                RequestKind::Next(v) => (Some(v.clone()), false, None, false),
                RequestKind::Return => (None, true, None, true),
                RequestKind::Throw(e) => (None, true, Some(e.clone()), true),
            };
            inner.set_data = data;
            inner.need_done = need_done;
            inner.error_override = error;
            if force_stop {
                inner.force_stop = true;
            }
            (inner.co, inner.dispatcher.clone())
        };
        dispatcher.run_immediately(co);
    }

    fn on_yield_settled(&self, result: Result<V, Rejection<E>>) {
        let rejected = {
            let mut inner = self.0.borrow_mut();
            let front = inner
                .pending
                .pop_front()
                .expect("a yielded promise settled with no pending request to serve");
            match result {
                Ok(value) => {
                    front.result.resolve(AGenItem { done: false, value: Some(value) });
                    false
                }
                Err(rejection) => {
                    front.result.settle(Err(rejection));
                    inner.need_done = true;
                    inner.force_stop = true;
                    true
                }
            }
        };
        if rejected {
            // A yielded promise rejecting forces the body to unwind
            // regardless of whether more requests are already queued; those
            // are settled once the body's wrapper future completes (see
            // `AsyncGenerator::new`).
            let (co, dispatcher) = {
                let inner = self.0.borrow();
                (inner.co, inner.dispatcher.clone())
            };
            dispatcher.run_immediately(co);
        } else if self.0.borrow().pending.front().is_some() {
            self.try_schedule();
        }
    }

    pub fn next(&self, v: V) -> Promise<AGenItem<V>, E> {
        self.request(RequestKind::Next(v))
    }

    pub fn return_(&self) -> Promise<AGenItem<V>, E> {
        self.request(RequestKind::Return)
    }

    pub fn throw(&self, e: E) -> Promise<AGenItem<V>, E> {
        self.request(RequestKind::Throw(e))
    }

    pub fn is_done(&self) -> bool {
        self.0.borrow().done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Handle(u32);

    #[test]
    fn fifo_settlement_in_call_order() {
        let d = Dispatcher::new();
        let d_for_body = d.clone();
        let agen: AsyncGenerator<Handle, Handle> = AsyncGenerator::new(&d, move |scope| {
            let d = d_for_body.clone();
            async move {
                scope.yield_value(&Promise::resolved(&d, Handle(1))).await;
                scope.yield_value(&Promise::resolved(&d, Handle(2))).await;
                Ok(Handle(3))
            }
        });

        let p1 = agen.next(Handle(0));
        let p2 = agen.next(Handle(0));
        let p3 = agen.next(Handle(0));
        d.run_until_idle();

        assert_eq!(
            p1.settled_result(),
            Some(Ok(AGenItem { done: false, value: Some(Handle(1)) }))
        );
        assert_eq!(
            p2.settled_result(),
            Some(Ok(AGenItem { done: false, value: Some(Handle(2)) }))
        );
        assert_eq!(
            p3.settled_result(),
            Some(Ok(AGenItem { done: true, value: Some(Handle(3)) }))
        );
    }

    #[test]
    fn yield_rejection_terminates_and_drains_pending() {
        let d = Dispatcher::new();
        let d_for_body = d.clone();
        let agen: AsyncGenerator<Handle, Handle> = AsyncGenerator::new(&d, move |scope| {
            let d = d_for_body.clone();
            async move {
                scope.yield_value(&Promise::rejected(&d, Handle(7))).await;
                Ok(Handle(0))
            }
        });

        let p1 = agen.next(Handle(0));
        let p2 = agen.next(Handle(0));
        d.run_until_idle();

        assert_eq!(p1.settled_result(), Some(Err(Rejection::User(Handle(7)))));
        assert_eq!(p2.settled_result(), Some(Ok(AGenItem { done: true, value: None })));

        let p3 = agen.next(Handle(0));
        assert_eq!(p3.settled_result(), Some(Ok(AGenItem { done: true, value: None })));
    }

    #[test]
    fn queued_return_takes_effect_after_in_flight_yield() {
        let d = Dispatcher::new();
        let (source, resolve, _reject) = Promise::<Handle, Handle>::deferred(&d);
        let d_for_body = d.clone();
        let agen: AsyncGenerator<Handle, Handle> = AsyncGenerator::new(&d, move |scope| {
            let _d = d_for_body.clone();
            let source = source.clone();
            async move {
                match scope.yield_value(&source).await {
                    AGenResumption::Value(_) => {}
                    AGenResumption::Stop => return Ok(Handle(255)),
                    AGenResumption::Throw(e) => return Err(Rejection::User(e)),
                }
                Ok(Handle(0))
            }
        });

        let p1 = agen.next(Handle(0));
        let p2 = agen.return_();
        assert!(!agen.is_done());

        resolve(Handle(10));
        d.run_until_idle();

        assert_eq!(
            p1.settled_result(),
            Some(Ok(AGenItem { done: false, value: Some(Handle(10)) }))
        );
        assert_eq!(p2.settled_result(), Some(Ok(AGenItem { done: true, value: None })));
        assert!(agen.is_done());
    }
}
