//! A waker that does nothing.
//!
//! Copied near-verbatim from the teacher's `coroutine/waker.rs`: real
//! wakeups in this crate never come through the `Waker` mechanism, they come
//! from a coroutine's id being pushed back onto the [`Dispatcher`](crate::dispatcher::Dispatcher)'s
//! task queue. Every future we poll is polled again only because something
//! explicitly re-enqueued its coroutine, so the waker itself is inert.

use std::task::{RawWaker, RawWakerVTable, Waker};

pub(crate) fn create() -> Waker {
    // Safety: the vtable's functions do nothing, which is trivially memory-safe.
    unsafe { Waker::from_raw(RAW_WAKER) }
}

const RAW_WAKER: RawWaker = RawWaker::new(std::ptr::null(), &VTABLE);
const VTABLE: RawWakerVTable = RawWakerVTable::new(clone, do_nothing, do_nothing, do_nothing);

unsafe fn clone(_: *const ()) -> RawWaker {
    RAW_WAKER
}
unsafe fn do_nothing(_: *const ()) {}
