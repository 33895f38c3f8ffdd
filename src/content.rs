use crate::desc::Desc;

/// The `{object, descriptor}` pair every container transacts as one unit.
///
/// The two pointers only mean something together: the object pointer is where
/// the handle points, the descriptor pointer is whose counts it holds. A pair
/// with a descriptor always has an object; a pair with an object but no
/// descriptor is a raw borrow whose lifetime the creator vouched for; the
/// null state is both-null.
pub struct Content<T> {
    pub(crate) obj: *const T,
    pub(crate) desc: *const Desc,
}

// Manual impls: the derives would demand T: Clone/Copy.
impl<T> Clone for Content<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Content<T> {}

impl<T> Content<T> {
    pub const fn null() -> Self {
        Self {
            obj: core::ptr::null(),
            desc: core::ptr::null(),
        }
    }

    pub(crate) fn new(obj: *const T, desc: *const Desc) -> Self {
        debug_assert!(desc.is_null() || !obj.is_null());
        Self { obj, desc }
    }

    pub(crate) fn from_obj(obj: *const T) -> Self {
        Self {
            obj,
            desc: core::ptr::null(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.obj.is_null()
    }

    pub(crate) fn has_desc(&self) -> bool {
        !self.desc.is_null()
    }

    fn key(&self) -> (usize, usize) {
        (self.obj as usize, self.desc as usize)
    }
}

impl<T> PartialEq for Content<T> {
    fn eq(&self, other: &Self) -> bool {
        self.obj == other.obj && self.desc == other.desc
    }
}
impl<T> Eq for Content<T> {}

impl<T> PartialOrd for Content<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Content<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl<T> core::fmt::Debug for Content<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Content")
            .field("obj", &self.obj)
            .field("desc", &self.desc)
            .finish()
    }
}

/// Anything that projects to a [`Content`] pair.
///
/// Comparisons and compare-exchange comparands are written once against this
/// trait rather than per concrete pointer flavor; counted handles, raw
/// pointers, and the pair itself all qualify.
pub trait AsContent<T> {
    fn as_content(&self) -> Content<T>;
}

impl<T> AsContent<T> for Content<T> {
    fn as_content(&self) -> Content<T> {
        *self
    }
}

impl<T> AsContent<T> for *const T {
    fn as_content(&self) -> Content<T> {
        Content::from_obj(*self)
    }
}

impl<T> AsContent<T> for *mut T {
    fn as_content(&self) -> Content<T> {
        Content::from_obj(*self)
    }
}

impl<T> AsContent<T> for core::ptr::NonNull<T> {
    fn as_content(&self) -> Content<T> {
        Content::from_obj(self.as_ptr())
    }
}

impl<T, A: AsContent<T>> AsContent<T> for &A {
    fn as_content(&self) -> Content<T> {
        (**self).as_content()
    }
}
