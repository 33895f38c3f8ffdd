#[cfg(loom)]
pub(crate) mod atomic {
    pub(crate) use loom::sync::atomic::{
        fence, AtomicBool, AtomicIsize, AtomicPtr, AtomicUsize, Ordering,
    };

    pub(crate) fn light_barrier() {
        fence(Ordering::SeqCst)
    }

    pub(crate) fn heavy_barrier() {
        fence(Ordering::SeqCst)
    }
}

#[cfg(not(loom))]
pub(crate) mod atomic {
    pub(crate) use core::sync::atomic::{
        fence, AtomicBool, AtomicIsize, AtomicPtr, AtomicUsize, Ordering,
    };

    // The publication side of the hazard protocol. Pairs with `heavy_barrier`
    // on the reclamation side so that either the reader re-reads a changed
    // source, or the reclaimer observes the published hazard.
    pub(crate) fn light_barrier() {
        fence(Ordering::SeqCst)
    }

    pub(crate) fn heavy_barrier() {
        fence(Ordering::SeqCst)
    }
}
