use crate::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// One publication slot in a [`Registry`](crate::Registry).
///
/// Slots are allocated once and then live as long as their registry; a
/// released slot only clears its `active` flag so it can be claimed again.
pub(crate) struct GuardSlot {
    pub(crate) ptr: AtomicPtr<u8>,
    pub(crate) next: AtomicPtr<GuardSlot>,
    pub(crate) active: AtomicBool,
}

impl GuardSlot {
    pub(crate) fn protect(&self, ptr: *mut u8) {
        self.ptr.store(ptr, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.ptr.store(core::ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn try_activate(&self) -> bool {
        !self.active.load(Ordering::Acquire)
            && self
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    pub(crate) fn deactivate(&self) {
        debug_assert!(self.ptr.load(Ordering::Relaxed).is_null());
        self.active.store(false, Ordering::Release);
    }
}
