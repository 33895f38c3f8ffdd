use crate::registry::{self, Registry};
use crate::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};
use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

const MAX_REFCOUNT: usize = usize::MAX / 2;

/// The shared control block behind every counted handle.
///
/// Holds the strong and weak counts for one allocation. The owned value is
/// dropped the instant the strong count reaches zero; the allocation itself
/// is retired to the descriptor's [`Registry`] once the weak count follows,
/// so its memory outlives any concurrent guarded reader.
///
/// The weak count tallies weak handles plus one share held jointly by all
/// strong handles, so a non-zero strong count pins the allocation on its own.
#[repr(C)]
pub struct Desc {
    strong: AtomicUsize,
    weak: AtomicUsize,
    released_head: AtomicPtr<ReleasedNode>,
    registry: &'static Registry,
    /// # Safety
    ///
    /// Must only be called once, when the strong count has drained to zero.
    drop_value: unsafe fn(*mut Desc),
    /// # Safety
    ///
    /// Must only be called once, after `drop_value`, with no guard
    /// publishing this descriptor's address.
    dealloc: unsafe fn(*mut u8),
}

/// The concrete allocation: a descriptor followed by the value it owns.
///
/// `repr(C)` so a pointer to the allocation and a pointer to its descriptor
/// are interchangeable.
#[repr(C)]
pub(crate) struct DescAlloc<T> {
    desc: Desc,
    value: UnsafeCell<ManuallyDrop<T>>,
}

// Callbacks already run; late registrations fire immediately.
fn released_sentinel() -> *mut ReleasedNode {
    1usize as *mut ReleasedNode
}

struct ReleasedNode {
    f: Box<dyn FnOnce(&Desc, bool) + Send>,
    next: *mut ReleasedNode,
}

impl Desc {
    /// Allocate a descriptor owning `value`, with both counts at one.
    pub(crate) fn allocate<T>(value: T, registry: &'static Registry) -> NonNull<DescAlloc<T>> {
        let alloc = Box::new(DescAlloc {
            desc: Desc {
                strong: AtomicUsize::new(1),
                weak: AtomicUsize::new(1),
                released_head: AtomicPtr::new(core::ptr::null_mut()),
                registry,
                drop_value: drop_value_of::<T>,
                dealloc: registry::drop_boxed::<DescAlloc<T>>,
            },
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        // Safety: Box never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(alloc)) }
    }

    /// Take one more share of `count`, unless it has already drained to zero.
    ///
    /// A drained count cannot be revived: zero means the matching release has
    /// run (or is running) its teardown, and incrementing past it would
    /// resurrect freed state.
    fn try_increment(count: &AtomicUsize) -> bool {
        let mut n = count.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                std::process::abort();
            }
            match count.compare_exchange_weak(n, n + 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(now) => n = now,
            }
        }
    }

    pub(crate) fn acquire_strong(&self) -> bool {
        Self::try_increment(&self.strong)
    }

    pub(crate) fn acquire_weak(&self) -> bool {
        Self::try_increment(&self.weak)
    }

    /// Drop one strong share. On the last one, the value is dropped in
    /// place, release callbacks fire, and the strong handles' joint weak
    /// share is released.
    ///
    /// Returns true iff this call retired the allocation.
    pub(crate) fn release_strong(&self) -> bool {
        if self.strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // Safety: strong is zero and cannot be revived, so ours is the
            // only access to the value; drop_value runs exactly once.
            unsafe { (self.drop_value)(self as *const Desc as *mut Desc) };
            self.fire_released();
            self.release_weak()
        } else {
            false
        }
    }

    /// Drop one weak share. On the last one the allocation is retired to the
    /// registry, to be freed once no guard publishes it.
    ///
    /// Returns true iff this call retired the allocation.
    pub(crate) fn release_weak(&self) -> bool {
        let registry = self.registry;
        let dealloc = self.dealloc;
        if self.weak.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // Safety: both counts are zero; the repr(C) layout makes the
            // descriptor pointer the allocation base, and dealloc was chosen
            // for this allocation at construction. `self` may be freed as
            // soon as the registry has it, so nothing touches it after this.
            unsafe { registry.retire(self as *const Desc as *mut u8, dealloc) };
            true
        } else {
            false
        }
    }

    /// True once the strong count has permanently drained to zero: the value
    /// is gone and weak handles can no longer upgrade.
    pub fn is_released(&self) -> bool {
        self.strong.load(Ordering::Acquire) == 0
    }

    pub fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    pub fn weak_count(&self) -> usize {
        self.weak.load(Ordering::Acquire)
    }

    /// Register `f` to run when the value is released.
    ///
    /// The callback receives the descriptor and a flag that is true when the
    /// object was already released at registration time, in which case `f`
    /// runs inline before this returns. Otherwise `f` runs on whichever
    /// thread drops the last strong share.
    pub fn on_released(&self, f: impl FnOnce(&Desc, bool) + Send + 'static) {
        let mut head = self.released_head.load(Ordering::Acquire);
        if head == released_sentinel() {
            f(self, true);
            return;
        }
        let node = Box::into_raw(Box::new(ReleasedNode {
            f: Box::new(f),
            next: head,
        }));
        loop {
            match self.released_head.compare_exchange_weak(
                head,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(now) if now == released_sentinel() => {
                    // Lost the race against release; run inline after all.
                    // Safety: the node was never published.
                    let owned = unsafe { Box::from_raw(node) };
                    (owned.f)(self, true);
                    return;
                }
                Err(now) => {
                    head = now;
                    // Safety: the node was never published, so it is still ours.
                    unsafe { (*node).next = now };
                }
            }
        }
    }

    // Drain and invoke the callback stack exactly once.
    fn fire_released(&self) {
        let mut node = self.released_head.swap(released_sentinel(), Ordering::AcqRel);
        while !node.is_null() {
            // Safety: the swap made the list unreachable, so we own it.
            let owned = unsafe { Box::from_raw(node) };
            node = owned.next;
            (owned.f)(self, false);
        }
    }
}

impl<T> DescAlloc<T> {
    pub(crate) fn desc(&self) -> &Desc {
        &self.desc
    }

    pub(crate) fn value_ptr(&self) -> *const T {
        self.value.get() as *const T
    }
}

unsafe fn drop_value_of<T>(desc: *mut Desc) {
    let alloc = desc as *mut DescAlloc<T>;
    // Safety: repr(C) puts the descriptor first, so the cast recovers the
    // allocation; the caller guarantees the value has not been dropped yet.
    unsafe { ManuallyDrop::drop(&mut *(*alloc).value.get()) };
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Strong {}
    impl Sealed for super::Weak {}
}

/// Compile-time reference strength, choosing which of the descriptor's two
/// counts a container holds.
pub trait Strength: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    /// Whether this strength keeps the pointed-to value alive.
    const IS_STRONG: bool;

    /// Take one share of this strength's count.
    ///
    /// # Safety
    ///
    /// `desc` must point to a live (not yet freed) descriptor. Acquiring a
    /// drained count fails rather than resurrecting it, so a hazard guard on
    /// `desc` is sufficient proof.
    #[doc(hidden)]
    unsafe fn acquire(desc: *const Desc) -> bool;

    /// Drop one share of this strength's count.
    ///
    /// # Safety
    ///
    /// `desc` must hold an unreleased share of this strength's count that
    /// the caller owns.
    #[doc(hidden)]
    unsafe fn release(desc: *const Desc) -> bool;
}

/// Keeps the value alive; the value is dropped when the last strong share goes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Strong;

/// Observes the value's lifetime without extending it; pins only the
/// descriptor's allocation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Weak;

impl Strength for Strong {
    const IS_STRONG: bool = true;

    unsafe fn acquire(desc: *const Desc) -> bool {
        // Safety: desc is live per the contract.
        unsafe { &*desc }.acquire_strong()
    }

    unsafe fn release(desc: *const Desc) -> bool {
        // Safety: desc is live per the contract.
        unsafe { &*desc }.release_strong()
    }
}

impl Strength for Weak {
    const IS_STRONG: bool = false;

    unsafe fn acquire(desc: *const Desc) -> bool {
        // Safety: desc is live per the contract.
        unsafe { &*desc }.acquire_weak()
    }

    unsafe fn release(desc: *const Desc) -> bool {
        // Safety: desc is live per the contract.
        unsafe { &*desc }.release_weak()
    }
}
