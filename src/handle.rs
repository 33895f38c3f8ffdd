use crate::content::{AsContent, Content};
use crate::desc::{Desc, Strength, Strong, Weak};
use crate::Registry;
use core::marker::PhantomData;
use core::mem;

/// A counted handle: one `{object, descriptor}` pair plus one share of the
/// descriptor's count of strength `S`.
///
/// A handle exclusively owns its pair -- mutation takes `&mut self` and never
/// needs the guarded protocol. The concurrent counterpart, where one pair is
/// shared between threads, is [`AtomicRc`](crate::AtomicRc).
///
/// Handles are nullable. A handle may also carry a bare object pointer with
/// no descriptor: such a handle counts nothing and the code that created it
/// (via the unsafe [`from_obj`](RcHandle::from_obj)) vouches for the
/// pointer's lifetime.
pub struct RcHandle<T, S: Strength = Strong> {
    content: Content<T>,
    _strength: PhantomData<S>,
}

/// A nullable strong handle; keeps the pointed-to value alive.
pub type RcPtr<T> = RcHandle<T, Strong>;

/// A weak handle; observes the value's lifetime without extending it.
pub type RcWeak<T> = RcHandle<T, Weak>;

// Like Arc: the handle hands out &T from any thread that holds it.
unsafe impl<T: Send + Sync, S: Strength> Send for RcHandle<T, S> {}
unsafe impl<T: Send + Sync, S: Strength> Sync for RcHandle<T, S> {}

impl<T, S: Strength> RcHandle<T, S> {
    /// The null handle: no object, no descriptor, no count.
    pub const fn null() -> Self {
        Self {
            content: Content::null(),
            _strength: PhantomData,
        }
    }

    // Adopt `content` as-is. The caller transfers one S count for the
    // descriptor (or the content has none).
    pub(crate) fn from_content(content: Content<T>) -> Self {
        Self {
            content,
            _strength: PhantomData,
        }
    }

    // Copy `content` and take a fresh S count on it; null on a lost race
    // against a concurrent final release.
    pub(crate) fn acquired(content: Content<T>) -> Self {
        if content.has_desc() {
            // Safety: the caller's existing count or validated guard keeps
            // the descriptor live.
            if !unsafe { S::acquire(content.desc) } {
                return Self::null();
            }
        }
        Self::from_content(content)
    }

    pub(crate) fn content(&self) -> Content<T> {
        self.content
    }

    // Hand the pair out without releasing: ownership of the count moves to
    // the caller.
    pub(crate) fn into_content(self) -> Content<T> {
        let content = self.content;
        mem::forget(self);
        content
    }

    /// Wrap a bare pointer, with no descriptor and no counting.
    ///
    /// # Safety
    ///
    /// `obj` must remain valid for reads for as long as this handle (or
    /// anything cloned or derived from it) can reach it.
    pub unsafe fn from_obj(obj: *const T) -> Self {
        Self::from_content(Content::from_obj(obj))
    }

    /// Reassemble a handle from [`into_raw_parts`](RcHandle::into_raw_parts),
    /// adopting the count without acquiring.
    ///
    /// # Safety
    ///
    /// The caller must own one uncommitted S count on `desc` (with `obj`
    /// pointing into its allocation), or pass a null `desc` with `obj`
    /// satisfying the [`from_obj`](RcHandle::from_obj) contract.
    pub unsafe fn from_raw_parts(obj: *const T, desc: *const Desc) -> Self {
        Self::from_content(Content::new(obj, desc))
    }

    /// Disassemble without releasing: the count travels with the returned
    /// descriptor pointer.
    pub fn into_raw_parts(self) -> (*const T, *const Desc) {
        let content = self.into_content();
        (content.obj, content.desc)
    }

    pub fn is_null(&self) -> bool {
        self.content.is_null()
    }

    /// The stored object pointer, with no liveness check whatsoever.
    pub fn peek_obj(&self) -> *const T {
        self.content.obj
    }

    /// The strong count of the shared descriptor, if this handle has one.
    pub fn strong_count(&self) -> Option<usize> {
        self.content
            .has_desc()
            // Safety: our count keeps the descriptor live.
            .then(|| unsafe { &*self.content.desc }.strong_count())
    }

    /// The weak count of the shared descriptor, if this handle has one.
    pub fn weak_count(&self) -> Option<usize> {
        self.content
            .has_desc()
            // Safety: our count keeps the descriptor live.
            .then(|| unsafe { &*self.content.desc }.weak_count())
    }

    /// Register `f` on the shared descriptor, to run once the value is
    /// released. See [`Desc::on_released`]. No-op on descriptor-less handles.
    pub fn on_released(&self, f: impl FnOnce(&Desc, bool) + Send + 'static) {
        if self.content.has_desc() {
            // Safety: our count keeps the descriptor live.
            unsafe { &*self.content.desc }.on_released(f);
        }
    }

    /// Release the held count (possibly destroying the value) and go null.
    pub fn clear(&mut self) {
        let old = mem::replace(&mut self.content, Content::null());
        if old.has_desc() {
            // Safety: we owned one S count.
            unsafe { S::release(old.desc) };
        }
    }

    /// Synonym of [`clear`](RcHandle::clear).
    pub fn release(&mut self) {
        self.clear();
    }

    /// Drop the descriptor pointer *without* releasing its count; the object
    /// pointer stays. The counterpart of the adopting
    /// [`from_raw_parts`](RcHandle::from_raw_parts): together they move a
    /// count between handles without touching the descriptor.
    pub fn disown(&mut self) -> *const Desc {
        let desc = self.content.desc;
        self.content.desc = core::ptr::null();
        desc
    }

    /// Move the handle out, leaving null behind.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Exchange pairs with `other`. No count traffic: the same references
    /// exist afterwards, they just live in swapped handles.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.content, &mut other.content);
    }

    /// Store `new`, returning the previous handle with its count intact.
    pub fn exchange(&mut self, new: Self) -> Self {
        mem::replace(self, new)
    }

    /// Store `new` only if the current pair equals `current`.
    ///
    /// Returns the displaced handle on success; hands `new` back on failure.
    pub fn compare_exchange(
        &mut self,
        new: Self,
        current: impl AsContent<T>,
    ) -> Result<Self, Self> {
        if self.content == current.as_content() {
            Ok(mem::replace(self, new))
        } else {
            Err(new)
        }
    }

    /// Rebind the object pointer while carrying the same descriptor and
    /// count: the up-/down-/field-cast helper.
    ///
    /// # Safety
    ///
    /// `f` must return a non-null pointer into the same allocation the
    /// descriptor tracks (a base, field, or otherwise compatible view of
    /// the object this handle points to).
    pub unsafe fn cast<U>(self, f: impl FnOnce(*const T) -> *const U) -> RcHandle<U, S> {
        let content = self.into_content();
        let obj = if content.obj.is_null() {
            core::ptr::null()
        } else {
            f(content.obj)
        };
        RcHandle::from_content(Content::new(obj, content.desc))
    }
}

impl<T> RcPtr<T> {
    /// Allocate `value` with a fresh descriptor in the
    /// [global registry](Registry::global); strong and weak counts start at
    /// one.
    pub fn new(value: T) -> Self {
        Self::new_in(value, Registry::global())
    }

    /// Allocate `value` with its descriptor tied to `registry`.
    pub fn new_in(value: T, registry: &'static Registry) -> Self {
        let alloc = Desc::allocate(value, registry);
        // Safety: freshly allocated, and we adopt the initial strong count.
        let alloc = unsafe { alloc.as_ref() };
        Self::from_content(Content::new(alloc.value_ptr(), alloc.desc()))
    }

    /// The object pointer. A strong handle's pointer is live for as long as
    /// the handle is held (or, for descriptor-less handles, for whatever
    /// lifetime the creator vouched).
    pub fn get_obj(&self) -> *const T {
        self.content.obj
    }

    /// Borrow the object, or `None` for the null handle.
    pub fn get(&self) -> Option<&T> {
        // Safety: see get_obj; a non-null pointer is valid while we are held.
        unsafe { self.content.obj.as_ref() }
    }

    /// Take a weak handle to the same object.
    pub fn downgrade(&self) -> RcWeak<T> {
        if self.content.has_desc() {
            // Safety: our strong count keeps the descriptor live (and its
            // weak count non-zero, via the strong handles' joint share).
            if !unsafe { Weak::acquire(self.content.desc) } {
                return RcHandle::null();
            }
        }
        RcHandle::from_content(self.content)
    }
}

impl<T> RcWeak<T> {
    /// Attempt to take a strong handle. Fails once the value has been
    /// released; succeeding shares ownership as usual.
    pub fn upgrade(&self) -> Option<RcPtr<T>> {
        let content = self.content;
        if content.is_null() {
            return None;
        }
        if content.has_desc() {
            // Safety: our weak count keeps the descriptor allocation live.
            if !unsafe { Strong::acquire(content.desc) } {
                return None;
            }
        }
        Some(RcHandle::from_content(content))
    }

    /// The object pointer, or null once the value has been released.
    ///
    /// A non-null result proves nothing durable -- the value can be released
    /// the moment after the check. Use [`upgrade`](RcWeak::upgrade) before
    /// dereferencing.
    pub fn get_obj(&self) -> *const T {
        if self.is_released() {
            core::ptr::null()
        } else {
            self.content.obj
        }
    }

    /// True once the pointed-to value has been destroyed (or for the null
    /// handle).
    pub fn is_released(&self) -> bool {
        if self.content.has_desc() {
            // Safety: our weak count keeps the descriptor allocation live.
            unsafe { &*self.content.desc }.is_released()
        } else {
            self.content.obj.is_null()
        }
    }
}

impl<T, S: Strength> Clone for RcHandle<T, S> {
    fn clone(&self) -> Self {
        Self::acquired(self.content)
    }
}

impl<T, S: Strength> Drop for RcHandle<T, S> {
    fn drop(&mut self) {
        if self.content.has_desc() {
            // Safety: we own one S count.
            unsafe { S::release(self.content.desc) };
        }
    }
}

impl<T, S: Strength> Default for RcHandle<T, S> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, S: Strength> AsContent<T> for RcHandle<T, S> {
    fn as_content(&self) -> Content<T> {
        self.content
    }
}

impl<T, S: Strength, R: AsContent<T>> PartialEq<R> for RcHandle<T, S> {
    fn eq(&self, other: &R) -> bool {
        self.content == other.as_content()
    }
}
impl<T, S: Strength> Eq for RcHandle<T, S> {}

impl<T, S: Strength, R: AsContent<T>> PartialOrd<R> for RcHandle<T, S> {
    fn partial_cmp(&self, other: &R) -> Option<core::cmp::Ordering> {
        Some(self.content.cmp(&other.as_content()))
    }
}
impl<T, S: Strength> Ord for RcHandle<T, S> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.content.cmp(&other.content)
    }
}

impl<T, S: Strength> core::fmt::Debug for RcHandle<T, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RcHandle").field(&self.content).finish()
    }
}

/// A non-null strong handle: [`RcPtr`] minus the null state, so it can
/// implement [`Deref`](core::ops::Deref).
pub struct RcRef<T>(RcPtr<T>);

impl<T> RcRef<T> {
    /// Allocate `value` in the [global registry](Registry::global).
    pub fn new(value: T) -> Self {
        RcRef(RcPtr::new(value))
    }

    /// Allocate `value` with its descriptor tied to `registry`.
    pub fn new_in(value: T, registry: &'static Registry) -> Self {
        RcRef(RcPtr::new_in(value, registry))
    }

    pub fn get_obj(&self) -> *const T {
        self.0.get_obj()
    }

    pub fn downgrade(&self) -> RcWeak<T> {
        self.0.downgrade()
    }

    pub fn into_ptr(self) -> RcPtr<T> {
        self.0
    }
}

impl<T> core::ops::Deref for RcRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the inner handle is non-null by construction, and strong
        // handles keep their object live.
        unsafe { &*self.0.content.obj }
    }
}

impl<T> Clone for RcRef<T> {
    fn clone(&self) -> Self {
        // A strong clone of a live object cannot lose the acquire race.
        let cloned = self.0.clone();
        debug_assert!(!cloned.is_null());
        RcRef(cloned)
    }
}

impl<T> From<RcRef<T>> for RcPtr<T> {
    fn from(r: RcRef<T>) -> Self {
        r.0
    }
}

impl<T> TryFrom<RcPtr<T>> for RcRef<T> {
    type Error = RcPtr<T>;

    /// Fails on the null handle, handing it back.
    fn try_from(ptr: RcPtr<T>) -> Result<Self, RcPtr<T>> {
        if ptr.is_null() {
            Err(ptr)
        } else {
            Ok(RcRef(ptr))
        }
    }
}

impl<T> AsContent<T> for RcRef<T> {
    fn as_content(&self) -> Content<T> {
        self.0.as_content()
    }
}

impl<T> core::fmt::Debug for RcRef<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RcRef").field(&self.0.content).finish()
    }
}
