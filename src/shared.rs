use std::{convert::Infallible, fmt, marker::PhantomData, mem, ops::Deref, ptr::NonNull};

use crate::{
    block::Counts,
    error::alloc_failure,
    external::ExternalControlBlock,
    in_place::InPlaceControlBlock,
    AllocError, Allocator, Error, Global, WeakPtr,
};

/// The (element, control block) pair behind a non-empty handle.
pub(crate) struct Raw<T>
where
    T: ?Sized,
{
    pub(crate) element: NonNull<T>,
    pub(crate) block: NonNull<Counts>,
}

impl<T> Raw<T>
where
    T: ?Sized,
{
    pub(crate) fn counts(&self) -> &Counts {
        unsafe { self.block.as_ref() }
    }
}

impl<T> Clone for Raw<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Raw<T> where T: ?Sized {}

// Only ever handed pointers that came out of a `Box`.
fn drop_box<T>(ptr: NonNull<T>)
where
    T: ?Sized,
{
    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
}

/// A reference counted pointer sharing ownership of a value with other `SharedPtr`s.
///
/// A `SharedPtr` is either empty or holds a strong reference to a control block. The value is
/// destroyed when the last strong reference goes away, the control block once the last
/// [`WeakPtr`] is gone as well.
///
/// ```
/// # use tandem::SharedPtr;
/// let h1 = SharedPtr::new(42);
/// let h2 = h1.clone();
/// assert!(h1.use_count() == 2);
///
/// drop(h2);
/// assert!(h1.use_count() == 1);
/// assert!(*h1 == 42);
/// ```
pub struct SharedPtr<T>
where
    T: ?Sized,
{
    raw: Option<Raw<T>>,
    _owns: PhantomData<T>,
}

unsafe impl<T> Send for SharedPtr<T> where T: ?Sized + Send + Sync {}

unsafe impl<T> Sync for SharedPtr<T> where T: ?Sized + Send + Sync {}

impl<T> SharedPtr<T> {
    /// Constructs `value` in place, in a single allocation shared with the control block.
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if the allocation fails, use
    /// [`SharedPtr::try_new`] to handle that case.
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap_or_else(|err| alloc_failure(err))
    }

    pub fn try_new(value: T) -> Result<Self, AllocError> {
        Self::new_in(value, Global)
    }

    /// Constructs `value` in place, allocating through `alloc`.
    ///
    /// ```
    /// # use tandem::{Global, SharedPtr};
    /// let s = SharedPtr::new_in(String::from("a"), Global).unwrap();
    /// assert!(*s == "a");
    /// ```
    pub fn new_in<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        A: Allocator + Clone + Send + 'static,
    {
        match Self::try_new_with(alloc, |_| Ok::<_, Infallible>(value)) {
            Ok(shared) => Ok(shared),
            Err(Error::Alloc(err)) => Err(err),
            Err(Error::Construct(never)) => match never {},
        }
    }

    /// Allocates a control block through `alloc` and constructs the value in it with `f`.
    ///
    /// `f` receives the allocation strategy stored in the block, so values that allocate
    /// themselves can use the same strategy. If `f` fails the block is freed before its error is
    /// returned as [`Error::Construct`]. If the allocation fails `f` is never called.
    ///
    /// ```
    /// # use tandem::{Error, Global, SharedPtr};
    /// let s = SharedPtr::try_new_with(Global, |_| "7".parse::<u32>()).unwrap();
    /// assert!(*s == 7);
    ///
    /// let e = SharedPtr::try_new_with(Global, |_| "x".parse::<u32>());
    /// assert!(matches!(e, Err(Error::Construct(_))));
    /// ```
    pub fn try_new_with<A, E, F>(alloc: A, f: F) -> Result<Self, Error<E>>
    where
        A: Allocator + Clone + Send + 'static,
        F: FnOnce(&A) -> Result<T, E>,
    {
        let (block, element) = InPlaceControlBlock::allocate_with(alloc, f)?;
        Ok(unsafe { SharedPtr::from_raw_parts(Raw { element, block }) })
    }
}

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// An empty pointer. It has no control block and a `use_count` of zero.
    pub const fn null() -> Self {
        SharedPtr {
            raw: None,
            _owns: PhantomData,
        }
    }

    /// Adopts a boxed value. The box is dropped once the last strong reference is gone.
    ///
    /// ```
    /// # use std::fmt::Display;
    /// # use tandem::SharedPtr;
    /// let boxed: Box<dyn Display + Send + Sync> = Box::new(5);
    /// let s = SharedPtr::from_box(boxed);
    /// assert!(s.to_string() == "5");
    /// ```
    pub fn from_box(value: Box<T>) -> Self {
        Self::try_from_box(value).unwrap_or_else(|err| alloc_failure(err))
    }

    /// Like [`SharedPtr::from_box`], but returns an error if the control block cannot be
    /// allocated. The box has been dropped by then.
    pub fn try_from_box(value: Box<T>) -> Result<Self, AllocError> {
        unsafe { Self::adopt(NonNull::from(Box::leak(value)), drop_box::<T>, Global) }
    }

    /// Adopts a pointer obtained from [`Box::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` and must not be used by the caller afterwards.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        unsafe { Self::adopt(ptr, drop_box::<T>, Global) }.unwrap_or_else(|err| alloc_failure(err))
    }

    /// Adopts `ptr`, running `deleter` on it once the last strong reference is gone.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reads until `deleter` runs, and nothing else may free it.
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Result<Self, AllocError>
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        unsafe { Self::from_raw_in(ptr, deleter, Global) }
    }

    /// Adopts `ptr` with a control block allocated through `alloc`.
    ///
    /// If the control block cannot be allocated, `deleter` has already run on `ptr` when the
    /// error is returned.
    ///
    /// # Safety
    ///
    /// See [`SharedPtr::from_raw_with`].
    pub unsafe fn from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
        A: Allocator + Clone + Send + 'static,
    {
        unsafe { Self::adopt(ptr, deleter, alloc) }
    }

    // `drop_box::<T>` lives exactly as long as `T`, which the handle type already tracks, so it
    // skips the `'static` bound the public constructors need for caller supplied deleters.
    unsafe fn adopt<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: FnOnce(NonNull<T>),
        A: Allocator + Clone,
    {
        let block = ExternalControlBlock::allocate(ptr, deleter, alloc)?;
        Ok(unsafe { SharedPtr::from_raw_parts(Raw { element: ptr, block }) })
    }

    /// # Safety
    ///
    /// The caller transfers one strong reference on `raw.block` to the new pointer.
    pub(crate) unsafe fn from_raw_parts(raw: Raw<T>) -> Self {
        SharedPtr {
            raw: Some(raw),
            _owns: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> Option<Raw<T>> {
        self.raw
    }

    pub fn get(&self) -> Option<&T> {
        self.raw.as_ref().map(|raw| unsafe { raw.element.as_ref() })
    }

    /// The address of the value, `None` for an empty pointer.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.raw.map(|raw| raw.element)
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// The number of `SharedPtr`s sharing this value, including `self`. Zero if empty.
    pub fn use_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.counts().use_count())
    }

    /// The number of [`WeakPtr`]s observing this value.
    pub fn weak_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.counts().weak_count())
    }

    /// Gives up this reference and leaves the pointer empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Moves the reference out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Creates a [`WeakPtr`] observing the same value.
    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr::new(self)
    }

    /// Converts into a pointer to something reachable from the value, a field or an unsized
    /// view of it. The result shares the control block and keeps the whole value alive.
    ///
    /// ```
    /// # use tandem::SharedPtr;
    /// let s = SharedPtr::new((String::from("left"), 2));
    /// let left: SharedPtr<str> = s.clone().project(|pair| pair.0.as_str());
    ///
    /// drop(s);
    /// assert!(&*left == "left");
    /// ```
    ///
    /// The result no longer names `T`, but still drops it, so `T` has to be usable from any thread
    /// the projection can reach:
    ///
    /// ```compile_fail
    /// # use std::rc::Rc;
    /// # use tandem::SharedPtr;
    /// let s = SharedPtr::new((Rc::new(()), 1u32));
    /// let n: SharedPtr<u32> = s.project(|pair| &pair.1);
    /// ```
    pub fn project<U, F>(self, f: F) -> SharedPtr<U>
    where
        T: Send + Sync + 'static,
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let element = match self.get() {
            Some(value) => NonNull::from(f(value)),
            None => return SharedPtr::null(),
        };

        let mut this = mem::ManuallyDrop::new(self);
        match this.raw.take() {
            Some(raw) => unsafe {
                SharedPtr::from_raw_parts(Raw {
                    element,
                    block: raw.block,
                })
            },
            None => SharedPtr::null(),
        }
    }
}

impl<T> Clone for SharedPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(raw) = &self.raw {
            raw.counts().add_strong();
        }

        SharedPtr {
            raw: self.raw,
            _owns: PhantomData,
        }
    }
}

impl<T> Drop for SharedPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            unsafe { Counts::release_strong(raw.block) }
        }
    }
}

impl<T> Deref for SharedPtr<T>
where
    T: ?Sized,
{
    type Target = T;

    /// # Panics
    ///
    /// Panics if the pointer is empty.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T> Default for SharedPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for SharedPtr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T> From<Box<T>> for SharedPtr<T>
where
    T: ?Sized,
{
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> fmt::Debug for SharedPtr<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}
