use std::{fmt, mem};

use crate::{block::Counts, shared::Raw, SharedPtr};

/// A non-owning pointer to a value managed by [`SharedPtr`]s.
///
/// A `WeakPtr` keeps the control block alive but not the value. It cannot access the value
/// directly: the last `SharedPtr` may be dropped at any time, so you must first
/// [`lock`](WeakPtr::lock) or [`upgrade`](WeakPtr::upgrade) it.
///
/// ```
/// # use tandem::SharedPtr;
/// let s = SharedPtr::new(5);
/// let w = s.downgrade();
/// assert!(!w.expired());
///
/// drop(s);
/// assert!(w.expired());
/// assert!(w.lock().is_null());
/// ```
pub struct WeakPtr<T>
where
    T: ?Sized,
{
    raw: Option<Raw<T>>,
}

unsafe impl<T> Send for WeakPtr<T> where T: ?Sized + Send + Sync {}

unsafe impl<T> Sync for WeakPtr<T> where T: ?Sized + Send + Sync {}

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// An empty pointer, it is always expired.
    pub const fn null() -> Self {
        WeakPtr { raw: None }
    }

    /// See [`SharedPtr::downgrade`].
    pub fn new(shared: &SharedPtr<T>) -> Self {
        let raw = shared.raw();
        if let Some(raw) = &raw {
            raw.counts().add_weak();
        }

        WeakPtr { raw }
    }

    /// Returns `true` if the pointer is empty or the value has been destroyed.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Creates a strong pointer to the value, or `None` if it is already gone.
    ///
    /// Checking the strong count and taking the new reference happen in one atomic step, so a
    /// concurrent drop of the last `SharedPtr` either happens before (and this returns `None`)
    /// or after (and the value stays alive).
    pub fn upgrade(&self) -> Option<SharedPtr<T>> {
        let raw = self.raw?;
        if !raw.counts().try_add_strong() {
            return None;
        }

        Some(unsafe { SharedPtr::from_raw_parts(raw) })
    }

    /// Like [`upgrade`](WeakPtr::upgrade), but returns an empty `SharedPtr` if the value is gone.
    pub fn lock(&self) -> SharedPtr<T> {
        self.upgrade().unwrap_or_default()
    }

    /// The number of `SharedPtr`s keeping the value alive. Zero once it has been destroyed.
    pub fn use_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.counts().use_count())
    }

    /// The number of `WeakPtr`s observing the value, including `self`.
    pub fn weak_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.counts().weak_count())
    }

    pub fn reset(&mut self) {
        drop(self.take());
    }

    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Weak counterpart of [`SharedPtr::project`]. Returns `None` if the value is already gone,
    /// since the projection needs to look at it.
    pub fn project<U, F>(&self, f: F) -> Option<WeakPtr<U>>
    where
        T: Send + Sync + 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        self.upgrade().map(|shared| shared.project(f).downgrade())
    }
}

impl<T> Clone for WeakPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(raw) = &self.raw {
            raw.counts().add_weak();
        }

        WeakPtr { raw: self.raw }
    }
}

impl<T> Drop for WeakPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { Counts::release_weak(raw.block) }
        }
    }
}

impl<T> Default for WeakPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where
    T: ?Sized,
{
    fn from(value: &SharedPtr<T>) -> Self {
        Self::new(value)
    }
}

impl<T> fmt::Debug for WeakPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}
