use std::ptr;
use std::sync::atomic::{Ordering, fence};

use crate::error::Result;
use crate::launch::LaunchPlan;

/// End a lockstep phase of a group.
///
/// Every lane of a group runs on the same OS thread, so the barrier only has
/// to order the phase's memory effects before whatever the group does next.
pub(crate) fn group_barrier() {
    fence(Ordering::SeqCst);
}

/// Spin until `poll` yields a value, yielding the OS thread every
/// `yield_every` iterations (`0` never yields).
pub(crate) fn spin_until<R>(yield_every: u32, mut poll: impl FnMut() -> Option<R>) -> R {
    let mut spins: u32 = 0;
    loop {
        if let Some(value) = poll() {
            return value;
        }
        std::hint::spin_loop();
        spins = spins.wrapping_add(1);
        if yield_every != 0 && spins % yield_every == 0 {
            std::thread::yield_now();
        }
    }
}

/// Copy the spans every lane of group `g` covers from `src[src_base..]` to
/// `dst[dst_base..]`.
///
/// # Safety
/// - `src` must be valid for reads of `src_base + plan.count` elements.
/// - `dst` must be valid for writes of `dst_base + plan.count` elements, and
///   no one else may access the covered range while the copy runs.
/// - The two ranges must not overlap.
pub(crate) unsafe fn copy_group<T: Copy>(
    plan: &LaunchPlan,
    g: usize,
    src: *const T,
    src_base: usize,
    dst: *mut T,
    dst_base: usize,
) {
    for lane in 0..plan.workers_per_group {
        plan.for_each_span(g, lane, |offset, len| unsafe {
            ptr::copy_nonoverlapping(src.add(src_base + offset), dst.add(dst_base + offset), len);
        });
    }
}

/// Keep the first error of `next` in `acc`.
pub(crate) fn keep_first(acc: &mut Result<()>, next: Result<()>) {
    if acc.is_ok() {
        *acc = next;
    }
}
