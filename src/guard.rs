use crate::record::GuardSlot;
use crate::sync::atomic::{self, AtomicPtr, Ordering};
use crate::Registry;

/// A claim on one publication slot of a [`Registry`].
///
/// A guard does nothing by itself. Publishing an address through
/// [`protect`](Guard::protect) (or the lower-level [`publish`](Guard::publish)
/// plus a caller-side re-validation) keeps memory retired to the same
/// registry from being freed for as long as the publication stands. The
/// publication ends on [`reset`](Guard::reset) or drop, at which point the
/// slot returns to the registry for reuse.
pub(crate) struct Guard<'reg> {
    slot: &'reg GuardSlot,
    registry: &'reg Registry,
}

impl<'reg> Guard<'reg> {
    /// Claim a slot in the given registry.
    pub(crate) fn in_registry(registry: &'reg Registry) -> Self {
        Self {
            slot: registry.acquire_slot(),
            registry,
        }
    }

    /// Load `src` and publish the loaded address, retrying until the
    /// publication is validated against a re-read of `src`.
    ///
    /// On return, the pointed-to allocation cannot be freed by this guard's
    /// registry until the publication ends, provided every writer unlinks the
    /// pointer from `src` before retiring it.
    pub(crate) fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(Ordering::Relaxed);
        loop {
            match self.try_protect(ptr, src) {
                Ok(()) => break ptr,
                Err(now) => ptr = now,
            }
        }
    }

    /// Publish `ptr` and validate it is still what `src` holds.
    ///
    /// Fails with the fresh value of `src` if it changed in the meantime, in
    /// which case nothing stays published.
    pub(crate) fn try_protect<T>(&mut self, ptr: *mut T, src: &AtomicPtr<T>) -> Result<(), *mut T> {
        self.slot.protect(ptr.cast());

        atomic::light_barrier();

        let now = src.load(Ordering::Acquire);
        if ptr != now {
            self.slot.reset();
            Err(now)
        } else {
            Ok(())
        }
    }

    /// Publish `ptr` without validating it.
    ///
    /// The publication means nothing until the caller has issued a barrier
    /// and re-validated that `ptr` is still reachable from its source; see
    /// [`validate`](Guard::validate).
    pub(crate) fn publish(&mut self, ptr: *const u8) {
        self.slot.protect(ptr as *mut u8);
    }

    /// Barrier half of a raw [`publish`](Guard::publish).
    ///
    /// After this returns, either a concurrent reclaimer sees the
    /// publication, or the caller's re-read of its source sees the unlink
    /// that preceded the retire.
    pub(crate) fn validate() {
        atomic::light_barrier();
    }

    /// Withdraw the current publication, if any.
    pub(crate) fn reset(&mut self) {
        self.slot.reset();
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.slot.reset();
        self.registry.release_slot(self.slot);
    }
}
