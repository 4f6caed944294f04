//! A Promises/A+ implementation with cooperative coroutine sugar (`async`/
//! `await`, synchronous generators, and async generators) layered on top.
//!
//! Everything in this crate runs on one thread, driven by a single
//! [`Dispatcher`]: there is no executor handoff, no `Send`/`Sync` bound on
//! anything, and no real OS or green-thread stack anywhere. A "coroutine" is
//! just a boxed, pinned `Future<Output = ()>` that the dispatcher polls when
//! its id comes up in its task queue; every higher-level primitive in this
//! crate (`async`/`await`, [`Generator`], [`AsyncGenerator`]) is built as a
//! thin `Future` wrapper around that same queue, using a no-op
//! [`std::task::Waker`] since real wakeups always arrive by re-enqueuing a
//! [`CoId`](id::CoId), never through the `Waker` mechanism.
//!
//! TODO: Show example

pub mod async_await;
pub mod async_generator;
pub(crate) mod coro_state;
pub mod dispatcher;
pub mod generator;
pub mod id;
pub mod promise;
pub(crate) mod scheduler;
pub(crate) mod task_queue;
pub(crate) mod waker;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::async_await::AsyncScope;
    #[doc(hidden)]
    pub use crate::async_generator::{AGenItem, AGenResumption, AGenScope, AsyncGenerator};
    #[doc(hidden)]
    pub use crate::dispatcher::Dispatcher;
    #[doc(hidden)]
    pub use crate::generator::{GenScope, Generator, GeneratorResult, Resumption};
    #[doc(hidden)]
    pub use crate::id::CoId;
    #[doc(hidden)]
    pub use crate::promise::{Promise, Rejection};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Handle(u32);

    /// End-to-end: an `async` body that spawns a child and awaits a promise
    /// resolved from outside, combining both suspension points this crate
    /// offers an `async` body.
    #[test]
    fn async_body_spawns_and_awaits() {
        let d = Dispatcher::new();
        let (source, resolve, _reject) = Promise::<Handle, Handle>::deferred(&d);
        let p: Promise<Handle, Handle> = d.spawn_async(move |scope| {
            let source = source.clone();
            async move {
                let child = scope
                    .spawn(|_child_scope| async move { Ok(Handle(1)) })
                    .await;
                let from_child = scope.await_promise(&child).await?;
                let from_source = scope.await_promise(&source).await?;
                Ok(Handle(from_child.0 + from_source.0))
            }
        });
        resolve(Handle(41));
        d.run_until_idle();
        assert_eq!(p.settled_result(), Some(Ok(Handle(42))));
    }

    /// A generator pulled a few times, then stopped early with `return_`.
    #[test]
    fn generator_pull_then_stop_early() {
        let d = Dispatcher::new();
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log_for_body = log.clone();
        let g: Generator<Handle, Handle> = Generator::new(&d, move |scope| async move {
            loop {
                match scope.yield_value(Handle(0)).await {
                    Resumption::Value(v) => log_for_body.borrow_mut().push(v),
                    Resumption::Stop => return Handle(255),
                }
            }
        });

        let r0 = g.next(Handle(1));
        assert_eq!(r0.data, Some(Handle(0)));
        g.next(Handle(7));
        g.return_(Handle(9));

        assert_eq!(*log.borrow(), vec![Handle(7)]);
        assert!(g.is_done());
    }

    /// An async-generator whose produced values are themselves driven by
    /// deferred promises, pulled out of order relative to settlement.
    #[test]
    fn async_generator_end_to_end() {
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

        let first = agen.next(Handle(0));
        d.run_until_idle();
        assert_eq!(
            first.settled_result(),
            Some(Ok(AGenItem { done: false, value: Some(Handle(1)) }))
        );

        let second = agen.next(Handle(0));
        d.run_until_idle();
        assert_eq!(
            second.settled_result(),
            Some(Ok(AGenItem { done: false, value: Some(Handle(2)) }))
        );

        let third = agen.next(Handle(0));
        d.run_until_idle();
        assert_eq!(
            third.settled_result(),
            Some(Ok(AGenItem { done: true, value: Some(Handle(3)) }))
        );
    }
}
