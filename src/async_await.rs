//! The `async`/`await` coroutine primitive: a coroutine bound to a result
//! [`Promise`], where awaiting a promise suspends the coroutine until that
//! promise settles.
//!
//! Grounded on `original_source/src/async.c`'s `upromise_async`/`uasync_await`
//! pair, and on the teacher's `coroutine/duration.rs` two-phase `Future`
//! idiom for the suspension points themselves ([`SpawnFuture`], [`AwaitFuture`]).
//! There is no host stackful-coroutine facility to depend on (see `SPEC_FULL.md`
//! §"Out of scope"), so both suspension points are realized as ordinary
//! `Future`s driven by the crate's own [`Dispatcher`].

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::coro_state::CoroState;
use crate::dispatcher::Dispatcher;
use crate::id::CoId;
use crate::promise::{Promise, Rejection};

/// The coroutine identity and dispatcher handle of an in-flight `async` body.
///
/// Passed by value into the body closure, matching the source's
/// `AsyncContext { promise, co }` (the result promise itself isn't carried
/// here — the body communicates its outcome purely through its `Result`
/// return value, which [`Dispatcher::spawn_async`] settles on its behalf).
pub struct AsyncScope<E> {
    dispatcher: Dispatcher,
    co: CoId,
    _marker: PhantomData<E>,
}

impl<E> Clone for AsyncScope<E> {
    fn clone(&self) -> Self {
        AsyncScope {
            dispatcher: self.dispatcher.clone(),
            co: self.co,
            _marker: PhantomData,
        }
    }
}

impl<E> AsyncScope<E>
where
    E: Clone + fmt::Debug + 'static,
{
    /// Suspends the current async body until `q` settles, returning its
    /// settled result. A body propagates a rejection with `?` since its own
    /// return type is `Result<V, Rejection<E>>`.
    pub fn await_promise<V>(&self, q: &Promise<V, E>) -> AwaitFuture<V, E>
    where
        V: Clone + 'static,
    {
        AwaitFuture {
            state: CoroState::Running,
            dispatcher: self.dispatcher.clone(),
            co: self.co,
            promise: q.clone(),
            result: Rc::new(std::cell::RefCell::new(None)),
        }
    }

    /// The in-coroutine counterpart to [`Dispatcher::spawn_async`]: starts a
    /// child async body and runs it up to its first suspension point before
    /// this call returns control to its own caller, reproducing the source's
    /// "an async body starts before the calling coroutine's subsequent
    /// statement" guarantee (§4.4) without a real OS stack to switch away
    /// from.
    pub fn spawn<V, F, Fut>(&self, body: F) -> SpawnFuture<V, E>
    where
        V: Clone + 'static,
        F: FnOnce(AsyncScope<E>) -> Fut + 'static,
        Fut: Future<Output = Result<V, Rejection<E>>> + 'static,
    {
        SpawnFuture {
            state: CoroState::Running,
            dispatcher: self.dispatcher.clone(),
            self_co: self.co,
            build: Some(Box::new(move |scope| {
                Box::pin(body(scope)) as Pin<Box<dyn Future<Output = Result<V, Rejection<E>>>>>
            })),
            child: None,
        }
    }
}

impl Dispatcher {
    /// Spawns a fresh async body and returns its result promise immediately.
    ///
    /// Called from outside any running coroutine — the common case, e.g. a
    /// `then` trampoline or plain driving code — so the child is simply
    /// pushed to the head of the queue and runs on the next dispatcher turn
    /// (§4.4: "called from outside any coroutine ... the task is simply
    /// scheduled at head and runs on the next dispatcher tick"). Calling this
    /// from inside a running coroutine body works too, but won't get the
    /// "runs before my next statement" ordering that [`AsyncScope::spawn`]
    /// gives; use that instead when the ordering matters.
    pub fn spawn_async<V, E, F, Fut>(&self, body: F) -> Promise<V, E>
    where
        V: Clone + 'static,
        E: Clone + fmt::Debug + 'static,
        F: FnOnce(AsyncScope<E>) -> Fut + 'static,
        Fut: Future<Output = Result<V, Rejection<E>>> + 'static,
    {
        let result = Promise::pending(self);
        let co = self.reserve_id();
        let scope = AsyncScope {
            dispatcher: self.clone(),
            co,
            _marker: PhantomData,
        };
        let fut = body(scope);
        let result_for_body = result.clone();
        let wrapped = async move {
            match fut.await {
                Ok(v) => result_for_body.resolve(v),
                Err(rejection) => result_for_body.settle(Err(rejection)),
            }
        };
        self.register(co, Box::pin(wrapped));
        self.push_head(co);
        result
    }
}

/// The suspension point behind [`AsyncScope::await_promise`].
#[must_use = "futures do nothing unless polled by the dispatcher"]
pub struct AwaitFuture<V, E> {
    state: CoroState,
    dispatcher: Dispatcher,
    co: CoId,
    promise: Promise<V, E>,
    result: Rc<std::cell::RefCell<Option<Result<V, Rejection<E>>>>>,
}

impl<V, E> Future for AwaitFuture<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = Result<V, Rejection<E>>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            CoroState::Running => {
                self.state = CoroState::Halted;
                let result = Rc::clone(&self.result);
                let dispatcher = self.dispatcher.clone();
                let co = self.co;
                self.promise.on_settle_result(move |settled| {
                    *result.borrow_mut() = Some(settled);
                    dispatcher.push_head(co);
                });
                Poll::Pending
            }
            CoroState::Halted => Poll::Ready(
                self.result
                    .borrow_mut()
                    .take()
                    .expect("AwaitFuture resumed before its promise settled"),
            ),
        }
    }
}

type ChildBuilder<V, E> =
    Box<dyn FnOnce(AsyncScope<E>) -> Pin<Box<dyn Future<Output = Result<V, Rejection<E>>>>>>;

/// The suspension point behind [`AsyncScope::spawn`].
#[must_use = "futures do nothing unless polled by the dispatcher"]
pub struct SpawnFuture<V, E> {
    state: CoroState,
    dispatcher: Dispatcher,
    self_co: CoId,
    build: Option<ChildBuilder<V, E>>,
    child: Option<Promise<V, E>>,
}

impl<V, E> Future for SpawnFuture<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    type Output = Promise<V, E>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            CoroState::Running => {
                self.state = CoroState::Halted;
                let build = self
                    .build
                    .take()
                    .expect("SpawnFuture polled again after starting its child");
                let dispatcher = self.dispatcher.clone();
                let result = Promise::pending(&dispatcher);
                let child_co = dispatcher.reserve_id();
                let scope = AsyncScope {
                    dispatcher: dispatcher.clone(),
                    co: child_co,
                    _marker: PhantomData,
                };
                let fut = build(scope);
                let result_for_body = result.clone();
                let wrapped = async move {
                    match fut.await {
                        Ok(v) => result_for_body.resolve(v),
                        Err(rejection) => result_for_body.settle(Err(rejection)),
                    }
                };
                dispatcher.register(child_co, Box::pin(wrapped));
                // Child runs first, then `self` gets a turn again — both
                // ahead of anything else already queued.
                dispatcher.push_head(self.self_co);
                dispatcher.push_head(child_co);
                self.child = Some(result);
                Poll::Pending
            }
            CoroState::Halted => Poll::Ready(
                self.child
                    .take()
                    .expect("SpawnFuture resumed with no child in flight"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Handle(u32);

    #[test]
    fn async_body_fulfills_result_promise() {
        let d = Dispatcher::new();
        let p: Promise<Handle, Handle> = d.spawn_async(|_scope| async move { Ok(Handle(1)) });
        d.run_until_idle();
        assert_eq!(p.settled_result(), Some(Ok(Handle(1))));
    }

    #[test]
    fn await_rejected_propagates_and_terminates_body() {
        let d = Dispatcher::new();
        let ran_after = Rc::new(RefCell::new(false));
        let ran_after_inner = ran_after.clone();
        let d_for_body = d.clone();
        let p: Promise<Handle, Handle> = d.spawn_async(move |scope| {
            let d = d_for_body.clone();
            let ran_after = ran_after_inner.clone();
            async move {
                let rejected = Promise::<Handle, Handle>::rejected(&d, Handle(99));
                scope.await_promise(&rejected).await?;
                *ran_after.borrow_mut() = true;
                Ok(Handle(0))
            }
        });
        d.run_until_idle();
        assert_eq!(p.settled_result(), Some(Err(Rejection::User(Handle(99)))));
        assert!(!*ran_after.borrow());
    }

    #[test]
    fn await_fulfilled_resumes_with_value() {
        let d = Dispatcher::new();
        let (source, resolve, _reject) = Promise::<Handle, Handle>::deferred(&d);
        let p: Promise<Handle, Handle> = d.spawn_async(move |scope| {
            let source = source.clone();
            async move {
                let v = scope.await_promise(&source).await?;
                Ok(Handle(v.0 + 1))
            }
        });
        resolve(Handle(41));
        d.run_until_idle();
        assert_eq!(p.settled_result(), Some(Ok(Handle(42))));
    }

    #[test]
    fn spawned_child_runs_before_parents_next_statement() {
        let d = Dispatcher::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let order_for_parent = order.clone();
        let order_for_child = order.clone();
        let _p: Promise<Handle, Handle> = d.spawn_async(move |scope| {
            let order_for_parent = order_for_parent.clone();
            let order_for_child = order_for_child.clone();
            async move {
                let _child = scope
                    .spawn(move |_child_scope| {
                        let order_for_child = order_for_child.clone();
                        async move {
                            order_for_child.borrow_mut().push("child");
                            Ok(Handle(0))
                        }
                    })
                    .await;
                order_for_parent.borrow_mut().push("parent");
                Ok(Handle(0))
            }
        });
        d.run_until_idle();
        assert_eq!(*order.borrow(), vec!["child", "parent"]);
    }
}
