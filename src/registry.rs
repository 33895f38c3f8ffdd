use crate::record::GuardSlot;
use crate::sync::atomic::{self, AtomicIsize, AtomicPtr, Ordering};
use std::collections::BTreeSet;

#[cfg(loom)]
const RCOUNT_THRESHOLD: isize = 5;
#[cfg(not(loom))]
const RCOUNT_THRESHOLD: isize = 64;
const SLOT_COUNT_MULTIPLIER: isize = 2;

#[cfg(not(loom))]
static GLOBAL: Registry = Registry::new();

#[cfg(loom)]
loom::lazy_static! {
    static ref GLOBAL: Registry = Registry::new();
}

#[cfg(miri)]
extern "Rust" {
    fn miri_static_root(ptr: *const u8);
}

/// Synchronization point between guarded readers and concurrent releasers.
///
/// A guard publishes the address it is about to examine in
/// one of the registry's slots. Memory handed to [`Registry::retire`] is only
/// freed once no slot publishes its address, so a reader that has published
/// an address and re-validated its source can dereference it without racing
/// a concurrent free.
///
/// Both the pair nodes displaced from an [`AtomicRc`](crate::AtomicRc) and
/// descriptor allocations whose counts have drained to zero are funneled
/// through the same retire path.
///
/// Most code uses the process-wide [`Registry::global`]. A private registry
/// is mainly useful in tests, where `eager_reclaim` can be asserted against
/// without interference.
pub struct Registry {
    head: AtomicPtr<GuardSlot>,
    slots: AtomicIsize,
    retired: RetiredList,
    count: AtomicIsize,
}

// Macro so `new` can be const outside of loom.
macro_rules! new {
    ($($decl:tt)*) => {
        /// Construct a fresh, empty registry.
        pub $($decl)*() -> Self {
            Self {
                head: AtomicPtr::new(core::ptr::null_mut()),
                slots: AtomicIsize::new(0),
                retired: RetiredList {
                    head: AtomicPtr::new(core::ptr::null_mut()),
                },
                count: AtomicIsize::new(0),
            }
        }
    };
}

impl Registry {
    #[cfg(not(loom))]
    new!(const fn new);
    #[cfg(loom)]
    new!(fn new);

    /// Get a handle to the process-wide registry.
    pub fn global() -> &'static Self {
        #[cfg(miri)]
        unsafe {
            miri_static_root(&GLOBAL as *const _ as *const u8);
        };

        &GLOBAL
    }

    pub(crate) fn acquire_slot(&self) -> &GuardSlot {
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            // Safety: slots are never deallocated while the registry lives.
            let slot = unsafe { &*node };
            if slot.try_activate() {
                return slot;
            }
            node = slot.next.load(Ordering::Relaxed);
        }
        self.grow()
    }

    pub(crate) fn release_slot(&self, slot: &GuardSlot) {
        slot.reset();
        slot.deactivate();
    }

    // No free slot -- allocate one and link it in at the head.
    fn grow(&self) -> &GuardSlot {
        let slot = Box::into_raw(Box::new(GuardSlot {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
            next: AtomicPtr::new(core::ptr::null_mut()),
            active: crate::sync::atomic::AtomicBool::new(true),
        }));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // Safety: slot is not shared until the compare_exchange publishes it.
            unsafe { &*slot }.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, slot, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.slots.fetch_add(1, Ordering::Release);
                    // Safety: slots are never deallocated while the registry lives.
                    break unsafe { &*slot };
                }
                Err(now) => head = now,
            }
        }
    }

    /// Hand `ptr` to the registry to be freed with `deleter` once no guard
    /// publishes its address.
    ///
    /// Returns the number of retired pointers freed as a side effect.
    ///
    /// # Safety
    ///
    /// 1. No *new* guard will be pointed at `ptr` from this point forward.
    /// 2. `ptr` has not already been retired.
    /// 3. `deleter(ptr)` must be sound to call once, at any later time.
    pub(crate) unsafe fn retire(&self, ptr: *mut u8, deleter: unsafe fn(*mut u8)) -> usize {
        let node = Box::into_raw(Box::new(Retired {
            ptr,
            deleter,
            next: AtomicPtr::new(core::ptr::null_mut()),
        }));

        atomic::light_barrier();

        // Safety: node is a fresh, unshared single-node list.
        unsafe { self.retired.push_list(node, node) };
        self.count.fetch_add(1, Ordering::Release);

        self.check_threshold_and_reclaim()
    }

    /// Free every retired pointer whose address is not currently published.
    ///
    /// Returns the number of pointers freed.
    pub fn eager_reclaim(&self) -> usize {
        self.do_reclamation(0)
    }

    fn threshold(&self) -> isize {
        RCOUNT_THRESHOLD.max(SLOT_COUNT_MULTIPLIER * self.slots.load(Ordering::Acquire))
    }

    fn check_count_threshold(&self) -> isize {
        let mut rcount = self.count.load(Ordering::Acquire);
        while rcount > self.threshold() {
            match self
                .count
                .compare_exchange_weak(rcount, 0, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return rcount,
                Err(now) => rcount = now,
            }
        }
        0
    }

    fn check_threshold_and_reclaim(&self) -> usize {
        let rcount = self.check_count_threshold();
        if rcount == 0 {
            return 0;
        }
        self.do_reclamation(rcount)
    }

    fn do_reclamation(&self, mut rcount: isize) -> usize {
        let mut total_reclaimed = 0;
        loop {
            let mut done = true;
            let stolen = self.retired.pop_all();
            if !stolen.is_null() {
                atomic::heavy_barrier();

                // Everything published right now; later publications either
                // happen after the pointer was unlinked from its source, or
                // are followed by a re-validation that fails.
                let mut guarded = BTreeSet::new();
                let mut node = self.head.load(Ordering::Acquire);
                while !node.is_null() {
                    // Safety: slots are never deallocated while the registry lives.
                    let slot = unsafe { &*node };
                    guarded.insert(slot.ptr.load(Ordering::Acquire));
                    node = slot.next.load(Ordering::Relaxed);
                }

                let (nreclaimed, is_done) = self.match_reclaim(stolen, &guarded);
                done = is_done;

                rcount -= nreclaimed as isize;
                total_reclaimed += nreclaimed;
            }

            if rcount != 0 {
                self.count.fetch_add(rcount, Ordering::Release);
            }
            rcount = self.check_count_threshold();
            if rcount == 0 && done {
                break;
            }
        }
        total_reclaimed
    }

    fn match_reclaim(&self, stolen: *mut Retired, guarded: &BTreeSet<*mut u8>) -> (usize, bool) {
        let mut kept_head: *mut Retired = core::ptr::null_mut();
        let mut kept_tail: *mut Retired = core::ptr::null_mut();
        let mut nreclaimed = 0;

        let mut node = stolen;
        while !node.is_null() {
            // Safety: we atomically stole the whole list, so we own the nodes.
            let n = unsafe { &*node };
            let next = n.next.load(Ordering::Relaxed);
            debug_assert_ne!(node, next);

            if guarded.contains(&n.ptr) {
                // Still guarded -- keep it for a later sweep.
                n.next.store(kept_head, Ordering::Relaxed);
                kept_head = node;
                if kept_tail.is_null() {
                    kept_tail = node;
                }
            } else {
                // Safety:
                //
                // 1. No guard publishes n.ptr, so ours is the only pointer left.
                // 2. The node has not been freed before, since we own the
                //    stolen list.
                let owned = unsafe { Box::from_raw(node) };
                unsafe { (owned.deleter)(owned.ptr) };
                nreclaimed += 1;
            }

            node = next;
        }

        let done = self.retired.is_empty();
        // Safety: kept_head..kept_tail is a well-formed sublist we own.
        unsafe { self.retired.push_list(kept_head, kept_tail) };

        (nreclaimed, done)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // &mut self: no guards are outstanding, so everything retired can go.
        let mut node = self.retired.pop_all();
        while !node.is_null() {
            // Safety: we own the whole list, and each node is freed once.
            let owned = unsafe { Box::from_raw(node) };
            node = owned.next.load(Ordering::Relaxed);
            unsafe { (owned.deleter)(owned.ptr) };
        }

        let mut slot = self.head.load(Ordering::Relaxed);
        while !slot.is_null() {
            // Safety: no Guard borrows survive the registry.
            let owned = unsafe { Box::from_raw(slot) };
            slot = owned.next.load(Ordering::Relaxed);
            drop(owned);
        }
    }
}

struct Retired {
    ptr: *mut u8,
    /// # Safety
    ///
    /// Must be sound to call exactly once with `ptr`.
    deleter: unsafe fn(*mut u8),
    next: AtomicPtr<Retired>,
}

struct RetiredList {
    head: AtomicPtr<Retired>,
}

impl RetiredList {
    /// # Safety
    ///
    /// `sublist_head..sublist_tail` must be a well-formed, unshared list
    /// owned by the caller.
    unsafe fn push_list(&self, sublist_head: *mut Retired, sublist_tail: *mut Retired) {
        if sublist_head.is_null() {
            return;
        }
        debug_assert!(!sublist_tail.is_null());

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // Safety: we own the sublist until the compare_exchange publishes it.
            unsafe { &*sublist_tail }.next.store(head, Ordering::Release);
            match self.head.compare_exchange_weak(
                head,
                sublist_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(now) => head = now,
            }
        }
    }

    fn pop_all(&self) -> *mut Retired {
        self.head.swap(core::ptr::null_mut(), Ordering::Acquire)
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

/// Deleter for pointers that originate from `Box::into_raw::<T>`.
///
/// # Safety
///
/// `ptr` must have come from `Box::<T>::into_raw` and not been freed since.
pub(crate) unsafe fn drop_boxed<T>(ptr: *mut u8) {
    // Safety: per the contract above.
    drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
}
