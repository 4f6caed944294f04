//! Promises/A+ compliant promise, extended with a `Redirect` state for O(1)
//! amortized thenable adoption.
//!
//! Grounded on `original_source/src/upromise.c`'s promise section, redesigned
//! per the spec's own Design Notes suggestion: a tagged `{Pending, Settled,
//! Redirect}` state with union-find-style path compression on `Redirect`
//! chains, instead of the source's raw pointer-chasing. Rust's `Rc<RefCell<_>>`
//! sharing means a redirected promise's target is automatically visible to
//! every existing holder, so unlike the source we never need to rewrite a
//! waiter's back-pointer during a splice — only the waiter `CoId`s themselves
//! are migrated (see `redirect_to`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::dispatcher::Dispatcher;
use crate::task_queue::TaskQueue;

/// Why a promise was rejected.
///
/// Collapses the source's informal `RecurseError`/`BodyError`/`YieldRejection`
/// taxonomy into one type: `SelfResolution` is `RecurseError`; everything
/// else the source calls `BodyError` or `YieldRejection` is just "some `E`
/// the application produced", which is exactly what `User(E)` holds.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection<E: fmt::Debug> {
    #[error("promise attempted to resolve itself")]
    SelfResolution,
    #[error("{0:?}")]
    User(E),
}

impl<E: fmt::Debug> Rejection<E> {
    pub fn into_user(self) -> Option<E> {
        match self {
            Rejection::User(e) => Some(e),
            Rejection::SelfResolution => None,
        }
    }

    pub fn is_self_resolution(&self) -> bool {
        matches!(self, Rejection::SelfResolution)
    }
}

enum State<V, E> {
    Pending { waiters: TaskQueue },
    Settled(Result<V, Rejection<E>>),
    Redirect(Promise<V, E>),
}

struct Inner<V, E> {
    dispatcher: Dispatcher,
    state: State<V, E>,
}

impl<V, E> Drop for Inner<V, E>
where
    E: fmt::Debug,
{
    /// Diagnostic only — "unhandled rejection" reporting belongs to the
    /// embedding application, not this crate, so this is `debug!` rather
    /// than a hard requirement or a panic.
    fn drop(&mut self) {
        if let State::Settled(Err(reason)) = &self.state {
            tracing::debug!(?reason, "rejected promise dropped with no remaining handler");
        }
    }
}

/// A value that may not exist yet: pending, then exactly one of fulfilled or
/// rejected, forever.
///
/// `V` and `E` are required to be cheap, `'static` handles (see the crate's
/// module docs) rather than arbitrarily large owned data, so a settled
/// promise can be read — by multiple `then` calls, by multiple `await`s — any
/// number of times without move-out tricks.
pub struct Promise<V, E>(Rc<RefCell<Inner<V, E>>>);

impl<V, E> Clone for Promise<V, E> {
    fn clone(&self) -> Self {
        Promise(Rc::clone(&self.0))
    }
}

/// Converts the output of a `then` callback into a settlement of the
/// downstream promise.
///
/// Rather than the source's four generated callback arities (value-returning
/// vs. promise-returning, crossed with fulfill vs. reject), `then` is generic
/// over one settlement type per call, dispatched to the right behavior at
/// compile time via this trait. A blanket `impl<V, E> IntoSettlement<V, E>
/// for V` was considered and rejected: it would conflict with the `Result`
/// impl below under Rust's coherence rules, since `V` itself could be
/// instantiated as a `Result` type.
pub trait IntoSettlement<V, E> {
    fn into_settlement(self, target: &Promise<V, E>);
}

impl<V, E> IntoSettlement<V, E> for Result<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn into_settlement(self, target: &Promise<V, E>) {
        match self {
            Ok(v) => target.resolve(v),
            Err(e) => target.reject(e),
        }
    }
}

impl<V, E> IntoSettlement<V, E> for Rejection<E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn into_settlement(self, target: &Promise<V, E>) {
        target.settle(Err(self));
    }
}

impl<V, E> IntoSettlement<V, E> for Promise<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn into_settlement(self, target: &Promise<V, E>) {
        Promise::resolve_thenable(target, &self);
    }
}

impl<V, E> Promise<V, E>
where
    V: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn new_with_state(dispatcher: &Dispatcher, state: State<V, E>) -> Self {
        Promise(Rc::new(RefCell::new(Inner {
            dispatcher: dispatcher.clone(),
            state,
        })))
    }

    pub fn pending(dispatcher: &Dispatcher) -> Self {
        Self::new_with_state(
            dispatcher,
            State::Pending {
                waiters: TaskQueue::new(),
            },
        )
    }

    pub fn resolved(dispatcher: &Dispatcher, v: V) -> Self {
        Self::new_with_state(dispatcher, State::Settled(Ok(v)))
    }

    pub fn rejected(dispatcher: &Dispatcher, e: E) -> Self {
        Self::new_with_state(dispatcher, State::Settled(Err(Rejection::User(e))))
    }

    /// Creates a pending promise and synchronously invokes `executor` with
    /// it, matching the source's `new_promise(dispatcher, executor, ctx)`.
    /// The executor is expected to call `resolve`/`reject` on the promise it
    /// is given, synchronously or later.
    pub fn new(dispatcher: &Dispatcher, executor: impl FnOnce(&Promise<V, E>)) -> Self {
        let p = Self::pending(dispatcher);
        executor(&p);
        p
    }

    /// Returns a pending promise plus independent resolve/reject closures,
    /// for callers that want to settle a promise from outside an executor
    /// closure.
    pub fn deferred(dispatcher: &Dispatcher) -> (Self, impl Fn(V), impl Fn(E)) {
        let p = Self::pending(dispatcher);
        let for_resolve = p.clone();
        let for_reject = p.clone();
        (p, move |v: V| for_resolve.resolve(v), move |e: E| for_reject.reject(e))
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.0.borrow().dispatcher.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0.borrow().state, State::Pending { .. })
    }

    pub fn is_same_promise(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Crate-visible so other modules' tests (and `async_generator`'s own
    /// settlement bookkeeping) can observe a promise's settled state directly
    /// instead of only through `then`/`on_settle_result` reactions.
    ///
    /// Follows `Redirect` links first: a promise adopted via
    /// `resolve_thenable` stays `Redirect(target)` forever, even once
    /// `target` itself settles, so reading `self`'s own state directly would
    /// miss a settlement that already happened on the effective target.
    pub(crate) fn settled_result(&self) -> Option<Result<V, Rejection<E>>> {
        let target = self.effective_target();
        match &target.0.borrow().state {
            State::Settled(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Follows `Redirect` links to the promise whose state is authoritative,
    /// compressing every link walked so later calls are O(1).
    fn effective_target(&self) -> Promise<V, E> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        loop {
            let next = match &current.0.borrow().state {
                State::Redirect(target) => Some(target.clone()),
                _ => None,
            };
            match next {
                Some(target) => {
                    current = target;
                    chain.push(current.clone());
                }
                None => break,
            }
        }
        for node in &chain[..chain.len().saturating_sub(1)] {
            if Rc::ptr_eq(&node.0, &current.0) {
                continue;
            }
            let mut inner = node.0.borrow_mut();
            if matches!(inner.state, State::Redirect(_)) {
                inner.state = State::Redirect(current.clone());
            }
        }
        current
    }

    /// Settles `self` with `result`, a no-op if `self` is no longer pending.
    /// Splices every waiter onto the dispatcher queue, in registration order.
    ///
    /// Crate-visible (rather than private) so that `async_await` and
    /// `async_generator` can settle a promise directly with a `Rejection<E>`
    /// produced by a body's own `Result` return, without funneling it through
    /// the public `reject(e: E)` convenience (which always wraps in
    /// `Rejection::User`).
    pub(crate) fn settle(&self, result: Result<V, Rejection<E>>) {
        let (dispatcher, waiters) = {
            let mut inner = self.0.borrow_mut();
            if !matches!(inner.state, State::Pending { .. }) {
                return;
            }
            let dispatcher = inner.dispatcher.clone();
            let old = std::mem::replace(&mut inner.state, State::Settled(result));
            let waiters = match old {
                State::Pending { waiters } => waiters,
                _ => unreachable!("just matched Pending above"),
            };
            (dispatcher, waiters)
        };
        tracing::trace!("promise settled");
        dispatcher.splice_tail(waiters);
    }

    pub fn resolve(&self, v: V) {
        self.settle(Ok(v));
    }

    pub fn reject(&self, e: E) {
        self.settle(Err(Rejection::User(e)));
    }

    /// The resolution algorithm (Promises/A+ §2.3): settles `p` by adopting
    /// `q`'s eventual state. Rejects with `Rejection::SelfResolution` if `q`
    /// (after following any redirects) turns out to be `p` itself.
    fn resolve_thenable(p: &Promise<V, E>, q: &Promise<V, E>) {
        if !p.is_pending() {
            return;
        }
        let aim = q.effective_target();
        if Rc::ptr_eq(&p.0, &aim.0) {
            p.settle(Err(Rejection::SelfResolution));
            return;
        }
        if aim.is_pending() {
            p.redirect_to(&aim);
        } else {
            let settled = aim
                .settled_result()
                .expect("effective_target of a non-pending promise is itself settled");
            p.settle(settled);
        }
    }

    /// Installs `self` as a forwarding alias of `aim` (which must be pending)
    /// and migrates `self`'s waiters onto `aim`'s waiters.
    fn redirect_to(&self, aim: &Promise<V, E>) {
        let waiters = {
            let mut inner = self.0.borrow_mut();
            let old = std::mem::replace(&mut inner.state, State::Redirect(aim.clone()));
            match old {
                State::Pending { waiters } => waiters,
                _ => unreachable!("redirect_to called on a non-pending promise"),
            }
        };
        let mut aim_inner = aim.0.borrow_mut();
        match &mut aim_inner.state {
            State::Pending { waiters: aim_waiters } => aim_waiters.extend_from(waiters),
            _ => unreachable!("redirect target must be pending"),
        }
    }

    /// Registers `co` to run once `self` settles: onto `self`'s own waiters
    /// if still pending, or directly onto the dispatcher queue if already
    /// settled. Either way `co` never runs on the caller's stack (clean-stack
    /// delivery, Promises/A+ §2.2.4).
    fn on_settle_task(&self, co: crate::id::CoId) {
        let dispatcher = self.dispatcher();
        let mut inner = self.0.borrow_mut();
        match &mut inner.state {
            State::Pending { waiters } => waiters.push_tail(co),
            _ => {
                drop(inner);
                dispatcher.push_tail(co);
            }
        }
    }

    /// Registers a reaction to run (once, on the dispatcher, after `self`
    /// settles) with the settled result. Used to build `then`, `await`, and
    /// the async-generator's yield scheduling.
    pub(crate) fn on_settle_result(&self, reaction: impl FnOnce(Result<V, Rejection<E>>) + 'static) {
        let wait = self.effective_target();
        let dispatcher = wait.dispatcher();
        let co = dispatcher.reserve_id();
        let wait_for_body = wait.clone();
        let body = async move {
            let result = wait_for_body
                .settled_result()
                .expect("settle reaction scheduled before its promise settled");
            reaction(result);
        };
        dispatcher.register(co, Box::pin(body));
        wait.on_settle_task(co);
    }

    /// Registers a reaction that runs once `self` settles, ignoring the
    /// settled value. Convenience over [`Promise::on_settle_result`].
    pub fn on_settle(&self, reaction: impl FnOnce() + 'static) {
        self.on_settle_result(move |_| reaction());
    }

    /// The general two-sided `then`: `on_fulfilled` and `on_rejected` must
    /// produce the same settlement type for the returned promise, which may
    /// be a `Result<V2, E>`, a `Promise<V2, E>` (adopted via the resolution
    /// algorithm), or a `Rejection<E>` (forwarded as-is).
    pub fn then<V2, S, FOk, FErr>(&self, on_fulfilled: FOk, on_rejected: FErr) -> Promise<V2, E>
    where
        V2: Clone + 'static,
        S: IntoSettlement<V2, E> + 'static,
        FOk: FnOnce(V) -> S + 'static,
        FErr: FnOnce(Rejection<E>) -> S + 'static,
    {
        let dispatcher = self.dispatcher();
        let next = Promise::pending(&dispatcher);
        let wait = self.effective_target();
        let wait_for_registration = wait.clone();
        let next_for_body = next.clone();
        let co = dispatcher.reserve_id();
        let body = async move {
            let result = wait
                .settled_result()
                .expect("then trampoline scheduled before its promise settled");
            let settlement = match result {
                Ok(v) => on_fulfilled(v),
                Err(e) => on_rejected(e),
            };
            settlement.into_settlement(&next_for_body);
        };
        dispatcher.register(co, Box::pin(body));
        wait_for_registration.on_settle_task(co);
        next
    }

    /// Fulfillment-only `then`: rejections forward unchanged (including
    /// `Rejection::SelfResolution`, which a `Result<V2, E>`-typed `then`
    /// could not represent).
    pub fn map<V2>(&self, f: impl FnOnce(V) -> V2 + 'static) -> Promise<V2, E>
    where
        V2: Clone + 'static,
    {
        let next = Promise::pending(&self.dispatcher());
        let next_for_reaction = next.clone();
        self.on_settle_result(move |result| match result {
            Ok(v) => next_for_reaction.resolve(f(v)),
            Err(reason) => next_for_reaction.settle(Err(reason)),
        });
        next
    }

    /// Rejection-only `then`: fulfillment forwards unchanged.
    pub fn catch(&self, f: impl FnOnce(Rejection<E>) -> Result<V, E> + 'static) -> Promise<V, E> {
        let next = Promise::pending(&self.dispatcher());
        let next_for_reaction = next.clone();
        self.on_settle_result(move |result| match result {
            Ok(v) => next_for_reaction.resolve(v),
            Err(reason) => f(reason).into_settlement(&next_for_reaction),
        });
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Handle(u32);

    #[test]
    fn single_transition() {
        let d = Dispatcher::new();
        let p = Promise::<Handle, Handle>::pending(&d);
        p.resolve(Handle(1));
        p.resolve(Handle(2));
        assert_eq!(p.settled_result(), Some(Ok(Handle(1))));
    }

    #[test]
    fn registration_order() {
        let d = Dispatcher::new();
        let p = Promise::<Handle, Handle>::pending(&d);
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            p.then(
                move |_: Handle| -> Result<Handle, Handle> {
                    order.borrow_mut().push(i);
                    Ok(Handle(i))
                },
                |r| Err::<Handle, Handle>(r.into_user().unwrap()),
            );
        }
        p.resolve(Handle(0));
        d.run_until_idle();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn clean_stack_then_never_runs_synchronously() {
        let d = Dispatcher::new();
        let p = Promise::<Handle, Handle>::resolved(&d, Handle(7));
        let ran = Rc::new(RefCell::new(false));
        let ran_inner = ran.clone();
        p.then(
            move |v: Handle| -> Result<Handle, Handle> {
                *ran_inner.borrow_mut() = true;
                Ok(v)
            },
            |r| Err::<Handle, Handle>(r.into_user().unwrap()),
        );
        assert!(!*ran.borrow(), "then callback ran before control returned to the dispatcher");
        d.run_until_idle();
        assert!(*ran.borrow());
    }

    #[test]
    fn forwarding() {
        let d = Dispatcher::new();
        let p = Promise::<Handle, Handle>::pending(&d);
        let next = p.then(Ok, |r| Err::<Handle, Handle>(r.into_user().unwrap()));
        p.resolve(Handle(9));
        d.run_until_idle();
        assert_eq!(next.settled_result(), Some(Ok(Handle(9))));
    }

    #[test]
    fn self_resolution_rejects() {
        let d = Dispatcher::new();
        let p: Promise<Handle, Handle> = Promise::resolved(&d, Handle(1));
        let looped: Rc<RefCell<Option<Promise<Handle, Handle>>>> = Rc::new(RefCell::new(None));
        let looped_for_body = looped.clone();
        let d_for_reject = d.clone();
        let result = p.then(
            move |_v: Handle| looped_for_body.borrow().clone().unwrap(),
            move |r: Rejection<Handle>| Promise::rejected(&d_for_reject, r.into_user().unwrap()),
        );
        *looped.borrow_mut() = Some(result.clone());
        d.run_until_idle();
        assert!(matches!(result.settled_result(), Some(Err(Rejection::SelfResolution))));
    }

    #[test]
    fn adoption_transitivity() {
        let d = Dispatcher::new();
        let r: Promise<Handle, Handle> = Promise::pending(&d);
        let q: Promise<Handle, Handle> = Promise::pending(&d);
        let p: Promise<Handle, Handle> = Promise::pending(&d);

        Promise::resolve_thenable(&p, &q);
        Promise::resolve_thenable(&q, &r);
        r.resolve(Handle(42));
        d.run_until_idle();

        assert_eq!(p.settled_result(), Some(Ok(Handle(42))));
    }

    #[test]
    fn deferred_fulfill_then_reject_is_a_noop() {
        let d = Dispatcher::new();
        let (p, resolve, reject) = Promise::<Handle, Handle>::deferred(&d);
        let rejected = Rc::new(RefCell::new(false));
        let rejected_inner = rejected.clone();
        p.then(
            Ok,
            move |r| {
                *rejected_inner.borrow_mut() = true;
                Err::<Handle, Handle>(r.into_user().unwrap())
            },
        );
        resolve(Handle(3));
        reject(Handle(99));
        d.run_until_idle();
        assert_eq!(p.settled_result(), Some(Ok(Handle(3))));
        assert!(!*rejected.borrow());
    }
}
