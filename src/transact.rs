use crate::content::Content;
use crate::guard::Guard;
use crate::registry::{self, Registry};
use crate::sync::atomic::{AtomicPtr, Ordering};

/// Storage that reads and writes one [`Content`] pair as a single atomic unit.
///
/// The pair lives in an immutable heap node; the cell itself is one atomic
/// pointer, swung by compare-exchange, with null standing for the null pair.
/// Readers take a hazard guard on the node before dereferencing it, and
/// displaced nodes go through the registry's retire path, so a node address
/// can neither be freed nor reused while any token refers to it. That makes
/// token address comparison an exact "has the content changed" test.
pub(crate) struct Transactable<T> {
    cell: AtomicPtr<Content<T>>,
    registry: &'static Registry,
}

/// A validated snapshot of a [`Transactable`]'s content.
///
/// Holds the borrowed guard's publication for as long as the token lives.
pub(crate) struct ReadToken<'g, 'reg, T> {
    node: *mut Content<T>,
    content: Content<T>,
    guard: &'g mut Guard<'reg>,
}

impl<'g, 'reg, T> ReadToken<'g, 'reg, T> {
    pub(crate) fn content(&self) -> Content<T> {
        self.content
    }

    // The token owns its guard's publication; callers that need to publish a
    // second address while the snapshot stays pinned bring a second guard.
    fn into_parts(self) -> (*mut Content<T>, Content<T>, &'g mut Guard<'reg>) {
        (self.node, self.content, self.guard)
    }
}

/// A pending write: a freshly allocated node plus the exact node it expects
/// to displace. Publish with [`Transactable::end_write`].
pub(crate) struct WriteToken<'g, 'reg, T> {
    expected: *mut Content<T>,
    node: *mut Content<T>,
    displaced: Content<T>,
    guard: &'g mut Guard<'reg>,
}

impl<T> Transactable<T> {
    pub(crate) fn new(content: Content<T>, registry: &'static Registry) -> Self {
        Self {
            cell: AtomicPtr::new(Self::node_for(content)),
            registry,
        }
    }

    pub(crate) fn registry(&self) -> &'static Registry {
        self.registry
    }

    fn node_for(content: Content<T>) -> *mut Content<T> {
        if content.is_null() {
            core::ptr::null_mut()
        } else {
            Box::into_raw(Box::new(content))
        }
    }

    /// Snapshot the current content under `guard`'s protection.
    pub(crate) fn begin_read<'g, 'reg>(
        &self,
        guard: &'g mut Guard<'reg>,
    ) -> ReadToken<'g, 'reg, T> {
        let node = guard.protect(&self.cell);
        let content = if node.is_null() {
            Content::null()
        } else {
            // Safety: the guard validated the node against the cell, so it
            // cannot have been reclaimed, and nodes are immutable once
            // published.
            unsafe { *node }
        };
        ReadToken {
            node,
            content,
            guard,
        }
    }

    /// Whether `token` still reflects the latest published content.
    pub(crate) fn is_current(&self, token: &ReadToken<'_, '_, T>) -> bool {
        self.cell.load(Ordering::Acquire) == token.node
    }

    /// Turn a read snapshot into a write attempt against exactly that
    /// snapshot. The token's publication carries over, so the expected node
    /// cannot be recycled before the compare-exchange runs.
    pub(crate) fn promote_read_token<'g, 'reg>(
        &self,
        token: ReadToken<'g, 'reg, T>,
        new: Content<T>,
    ) -> WriteToken<'g, 'reg, T> {
        let (expected, displaced, guard) = token.into_parts();
        WriteToken {
            expected,
            node: Self::node_for(new),
            displaced,
            guard,
        }
    }

    /// Snapshot-and-promote in one step, for writers with no prior read.
    pub(crate) fn begin_write<'g, 'reg>(
        &self,
        guard: &'g mut Guard<'reg>,
        new: Content<T>,
    ) -> WriteToken<'g, 'reg, T> {
        let token = self.begin_read(guard);
        self.promote_read_token(token, new)
    }

    /// Attempt to publish the token's value.
    ///
    /// On success, returns the displaced content; the caller now owns
    /// whatever reference count it carries, and the displaced node has been
    /// retired. On failure (another writer raced ahead) returns `None` and
    /// nothing was published; retry from a fresh read.
    pub(crate) fn end_write(&self, token: WriteToken<'_, '_, T>) -> Option<Content<T>> {
        match self.cell.compare_exchange(
            token.expected,
            token.node,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                token.guard.reset();
                if !token.expected.is_null() {
                    // Safety: the node is unlinked, was allocated by
                    // node_for's Box, and is retired only here.
                    unsafe {
                        self.registry
                            .retire(token.expected.cast(), registry::drop_boxed::<Content<T>>)
                    };
                }
                Some(token.displaced)
            }
            Err(_) => {
                token.guard.reset();
                if !token.node.is_null() {
                    // Never published, still exclusively ours.
                    drop(unsafe { Box::from_raw(token.node) });
                }
                None
            }
        }
    }

    /// The current content, bypassing the token protocol.
    ///
    /// Only sound with exclusive access, where no writer can race the read.
    pub(crate) fn unsync_content(&mut self) -> Content<T> {
        let node = self.cell.load(Ordering::Relaxed);
        if node.is_null() {
            Content::null()
        } else {
            // Safety: &mut self, so the node is ours and live.
            unsafe { *node }
        }
    }
}

impl<T> Drop for Transactable<T> {
    fn drop(&mut self) {
        let node = self.cell.load(Ordering::Relaxed);
        if !node.is_null() {
            // Safety: &mut self and no outstanding tokens; the node was
            // allocated by node_for and never retired.
            drop(unsafe { Box::from_raw(node) });
        }
    }
}
