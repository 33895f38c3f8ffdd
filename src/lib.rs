//! Lock-free reference-counted ownership with hazard-guarded shared cells.
//!
//! This library implements a split strong/weak reference-counting scheme in
//! which shared ownership can live inside a mutable, concurrently updated
//! cell. A counted reference is a `{object, descriptor}` pair: the object
//! pointer is what callers dereference, and the descriptor carries the
//! counts. Keeping the two side by side is what allows a handle to point
//! into the middle of an allocation (a field, an element, a base-class view)
//! while the counts still govern the whole.
//!
//! Single-threaded ownership uses [`RcHandle`] (with its strong and weak
//! aliases [`RcPtr`] and [`RcWeak`], and the never-null [`RcRef`]). Shared
//! mutable ownership uses [`AtomicRc`] ([`AtomicRcPtr`], [`AtomicRcWeak`]),
//! whose loads, stores, swaps and compare-exchanges are all lock-free and
//! safe under any interleaving.
//!
//! The hard part of a mutable shared cell is the race between a reader that
//! has seen a pair and a writer that displaces the pair and drops its count
//! to zero. [Hazard pointers][hazptr] close that race: a reader publishes
//! the descriptor's address, re-validates that the cell still holds the
//! pair, and only then touches the count. Displaced descriptors and cell
//! nodes are retired to a [`Registry`] and freed once no published guard
//! covers them.
//!
//! Dropping the last strong count destroys the object immediately, on the
//! releasing thread; guards defer only the reuse of memory, never
//! destruction. Weak handles keep the allocation (and the counts) alive so
//! that liveness can still be queried after release.
//!
//! [hazptr]: https://citeseerx.ist.psu.edu/viewdoc/download?doi=10.1.1.395.378&rep=rep1&type=pdf

#![deny(unsafe_op_in_unsafe_fn)]

mod atomic;
mod content;
mod desc;
mod guard;
mod handle;
mod record;
mod registry;
mod sync;
mod transact;

pub use atomic::{AtomicRc, AtomicRcPtr, AtomicRcWeak};
pub use content::{AsContent, Content};
pub use desc::{Desc, Strength, Strong, Weak};
pub use handle::{RcHandle, RcPtr, RcRef, RcWeak};
pub use registry::Registry;
