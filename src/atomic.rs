use crate::content::{AsContent, Content};
use crate::desc::{Strength, Strong, Weak};
use crate::guard::Guard;
use crate::handle::{RcHandle, RcPtr, RcWeak};
use crate::transact::Transactable;
use crate::Registry;
use core::marker::PhantomData;

/// A counted handle shared between threads: the concurrent counterpart of
/// [`RcHandle`].
///
/// Every method takes `&self`; all mutation goes through the cell's
/// compare-exchange protocol and all reads that touch the descriptor are
/// hazard-guarded, so any mix of concurrent loads, stores, swaps and
/// compare-exchanges is safe. Each observable transition is atomic: a reader
/// sees either the full old pair or the full new pair, never a torn mix, and
/// every displaced reference is released exactly once.
pub struct AtomicRc<T, S: Strength = Strong> {
    inner: Transactable<T>,
    _strength: PhantomData<S>,
}

/// A shared cell of strong handles.
pub type AtomicRcPtr<T> = AtomicRc<T, Strong>;

/// A shared cell of weak handles.
pub type AtomicRcWeak<T> = AtomicRc<T, Weak>;

unsafe impl<T: Send + Sync, S: Strength> Send for AtomicRc<T, S> {}
unsafe impl<T: Send + Sync, S: Strength> Sync for AtomicRc<T, S> {}

impl<T, S: Strength> AtomicRc<T, S> {
    /// An empty cell in the [global registry](Registry::global).
    pub fn null() -> Self {
        Self::new_in(RcHandle::null(), Registry::global())
    }

    /// Adopt `handle` into a new cell in the
    /// [global registry](Registry::global). No count traffic: the handle's
    /// count now belongs to the cell.
    pub fn new(handle: RcHandle<T, S>) -> Self {
        Self::new_in(handle, Registry::global())
    }

    /// Adopt `handle` into a new cell whose pair nodes retire to `registry`.
    pub fn new_in(handle: RcHandle<T, S>, registry: &'static Registry) -> Self {
        Self {
            inner: Transactable::new(handle.into_content(), registry),
            _strength: PhantomData,
        }
    }

    /// Take a counted snapshot of the current handle.
    ///
    /// This is the guarded acquire: snapshot the pair, publish the
    /// descriptor's address, re-validate that the pair is still current, and
    /// only then take a count of strength `S`. Returns the null handle if
    /// the cell is empty.
    pub fn load(&self) -> RcHandle<T, S> {
        RcHandle::from_content(self.guarded_acquire::<S>())
    }

    /// The current object pointer, unguarded: valid only as long as the
    /// caller independently knows the referent cannot be released.
    pub fn peek_obj(&self) -> *const T {
        let mut guard = Guard::in_registry(self.inner.registry());
        self.inner.begin_read(&mut guard).content().obj
    }

    pub fn is_null(&self) -> bool {
        let mut guard = Guard::in_registry(self.inner.registry());
        self.inner.begin_read(&mut guard).content().is_null()
    }

    /// Store `new`, releasing the displaced handle.
    pub fn store(&self, new: RcHandle<T, S>) {
        drop(self.swap(new));
    }

    /// Atomically clear the cell, returning what it held. Under concurrent
    /// `take`s, exactly one caller gets each stored reference.
    pub fn take(&self) -> RcHandle<T, S> {
        self.swap(RcHandle::null())
    }

    /// Store `new` and return the previous handle: an exactly-once handoff.
    /// `new`'s count moves into the cell, the displaced count moves out to
    /// the returned handle; the totals never change.
    pub fn swap(&self, new: RcHandle<T, S>) -> RcHandle<T, S> {
        let new_content = new.into_content();
        let mut guard = Guard::in_registry(self.inner.registry());
        loop {
            let write = self.inner.begin_write(&mut guard, new_content);
            if let Some(displaced) = self.inner.end_write(write) {
                return RcHandle::from_content(displaced);
            }
        }
    }

    /// Synonym of [`swap`](AtomicRc::swap).
    pub fn exchange(&self, new: RcHandle<T, S>) -> RcHandle<T, S> {
        self.swap(new)
    }

    /// Store `new` only if the cell's pair equals `current`, as one atomic
    /// step against the live cell.
    ///
    /// On success the displaced handle comes back with its count; on failure
    /// (the pair differs, possibly because a racing writer won) `new` comes
    /// back untouched. The comparison is pairwise over
    /// `{object, descriptor}`.
    pub fn compare_exchange(
        &self,
        new: RcHandle<T, S>,
        current: impl AsContent<T>,
    ) -> Result<RcHandle<T, S>, RcHandle<T, S>> {
        let expected = current.as_content();
        let mut guard = Guard::in_registry(self.inner.registry());
        loop {
            let token = self.inner.begin_read(&mut guard);
            if token.content() != expected {
                return Err(new);
            }
            let write = self.inner.promote_read_token(token, new.content());
            if self.inner.end_write(write).is_some() {
                // The cell adopted new's count; we adopt the displaced one,
                // which is exactly `expected`.
                let _ = new.into_content();
                return Ok(RcHandle::from_content(expected));
            }
            // A writer raced ahead; re-read and re-compare.
        }
    }

    // The guarded-acquire retry loop shared by every counted read. `S2` is
    // the strength being acquired, which need not match the cell's own.
    fn guarded_acquire<S2: Strength>(&self) -> Content<T> {
        let registry = self.inner.registry();
        let mut guard = Guard::in_registry(registry);
        let mut desc_guard = Guard::in_registry(registry);
        loop {
            let token = self.inner.begin_read(&mut guard);
            let content = token.content();
            if !content.has_desc() {
                // Null, or a raw borrow: nothing to acquire.
                return content;
            }

            desc_guard.publish(content.desc as *const u8);
            Guard::validate();
            if !self.inner.is_current(&token) {
                desc_guard.reset();
                continue;
            }

            // While the pair was current, the cell's own count pinned the
            // descriptor; now that our hazard is published and validated,
            // the descriptor cannot be freed even if the cell moves on.
            let acquired = unsafe { S2::acquire(content.desc) };
            let still_current = self.inner.is_current(&token);
            desc_guard.reset();

            if acquired {
                return content;
            }
            if still_current {
                // The count drained while the pair is still stored. Released
                // objects do not come back, so retrying cannot succeed:
                // report empty. (Reached only when upgrading a weak cell
                // whose object just died; a same-strength acquire cannot
                // drain while its own cell still stores the pair.)
                return Content::null();
            }
            // Otherwise we lost to a writer; retry against fresh content.
        }
    }
}

impl<T> AtomicRcPtr<T> {
    /// Take a weak handle to whatever the cell currently holds.
    pub fn load_weak(&self) -> RcWeak<T> {
        RcHandle::from_content(self.guarded_acquire::<Weak>())
    }

    /// Whether the cell currently holds an object. A strong cell's contents
    /// are live by construction, so no released-check is needed.
    pub fn is_live(&self) -> bool {
        !self.is_null()
    }
}

impl<T> AtomicRcWeak<T> {
    /// Attempt to take a strong handle to the object the cell's weak handle
    /// observes. Fails once the object has been released.
    pub fn upgrade(&self) -> Option<RcPtr<T>> {
        let content = self.guarded_acquire::<Strong>();
        if content.is_null() {
            None
        } else {
            Some(RcHandle::from_content(content))
        }
    }

    /// Whether the observed object is still alive: the cheap guarded read
    /// that checks liveness without taking a new count.
    pub fn is_live(&self) -> bool {
        let registry = self.inner.registry();
        let mut guard = Guard::in_registry(registry);
        let mut desc_guard = Guard::in_registry(registry);
        loop {
            let token = self.inner.begin_read(&mut guard);
            let content = token.content();
            if !content.has_desc() {
                return !content.is_null();
            }

            desc_guard.publish(content.desc as *const u8);
            Guard::validate();
            if !self.inner.is_current(&token) {
                desc_guard.reset();
                continue;
            }

            // Safety: published and validated, so the descriptor is live.
            let live = !unsafe { &*content.desc }.is_released();
            desc_guard.reset();
            return live;
        }
    }
}

impl<T, S: Strength> From<RcHandle<T, S>> for AtomicRc<T, S> {
    fn from(handle: RcHandle<T, S>) -> Self {
        Self::new(handle)
    }
}

impl<T, S: Strength> Default for AtomicRc<T, S> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, S: Strength> Drop for AtomicRc<T, S> {
    fn drop(&mut self) {
        let content = self.inner.unsync_content();
        if content.has_desc() {
            // Safety: the cell owned one S count.
            unsafe { S::release(content.desc) };
        }
    }
}

impl<T, S: Strength> core::fmt::Debug for AtomicRc<T, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtomicRc").finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn load_takes_a_fresh_count() {
        let handle = RcPtr::new(7u32);
        let probe = handle.clone();
        let cell = AtomicRcPtr::new(handle);
        assert_eq!(probe.strong_count(), Some(2));

        let loaded = cell.load();
        assert_eq!(probe.strong_count(), Some(3));
        assert_eq!(loaded, probe);
        drop(loaded);
        assert_eq!(probe.strong_count(), Some(2));
    }

    #[test]
    fn swap_is_an_exactly_once_handoff() {
        let first = RcPtr::new(1u32);
        let probe_first = first.clone();
        let cell = AtomicRcPtr::new(first);

        let second = RcPtr::new(2u32);
        let probe_second = second.clone();

        let old = cell.swap(second);
        assert_eq!(old, probe_first);
        assert_eq!(probe_first.strong_count(), Some(2));
        assert_eq!(probe_second.strong_count(), Some(2));

        drop(old);
        assert_eq!(probe_first.strong_count(), Some(1));
    }

    #[test]
    fn compare_exchange_by_pair() {
        let first = RcPtr::new(1u32);
        let probe = first.clone();
        let cell = AtomicRcPtr::new(first);

        // Wrong comparand: new comes back, cell untouched.
        let other = RcPtr::new(9u32);
        let given_back = cell
            .compare_exchange(RcPtr::new(2u32), &other)
            .unwrap_err();
        assert_eq!(*given_back.get().unwrap(), 2);
        assert_eq!(cell.load(), probe);

        // Matching comparand: displaced handle comes back.
        let old = cell
            .compare_exchange(RcPtr::new(3u32), &probe)
            .expect("comparand matches");
        assert_eq!(old, probe);
        assert_eq!(probe.strong_count(), Some(2));
        drop(old);
        assert_eq!(probe.strong_count(), Some(1));
    }

    #[test]
    fn weak_cell_upgrade_follows_liveness() {
        let strong = RcPtr::new(5u32);
        let cell = AtomicRcWeak::new(strong.downgrade());

        assert!(cell.is_live());
        let upgraded = cell.upgrade().expect("object is alive");
        assert_eq!(*upgraded.get().unwrap(), 5);
        drop(upgraded);

        drop(strong);
        assert!(!cell.is_live());
        assert!(cell.upgrade().is_none());
        Registry::global().eager_reclaim();
    }

    #[test]
    fn take_empties_the_cell() {
        let handle = RcPtr::new(4u32);
        let probe = handle.clone();
        let cell = AtomicRcPtr::new(handle);

        let taken = cell.take();
        assert_eq!(taken, probe);
        assert!(cell.is_null());
        assert!(cell.load().is_null());
    }

    #[test]
    fn raw_content_passes_through() {
        let value = 11u32;
        let cell = AtomicRcPtr::new(unsafe { RcPtr::from_obj(&value) });
        let loaded = cell.load();
        assert_eq!(loaded.get_obj(), &value as *const u32);
        assert_eq!(loaded.strong_count(), None);
    }
}
