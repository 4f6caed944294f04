//! The two-phase suspend-once `Future` idiom used by every suspension point
//! in this crate (spawn, await, generator yield, async-generator yield).
//!
//! Grounded directly on the teacher's `coroutine/duration.rs` (`NextTick`,
//! `DurationFuture`), which use the same `Running`/`Halted` split to turn a
//! single logical suspension point into a `Future` polled exactly twice:
//! once to record why we're suspending and return `Pending`, once more (after
//! the dispatcher has resumed us) to hand back the result and return `Ready`.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CoroState {
    Running,
    Halted,
}
