use std::{alloc::Layout, fmt, marker::PhantomData, ptr, ptr::NonNull};

use crate::AllocError;

/// An allocation strategy.
///
/// The strategy hands out raw blocks for a [`Layout`] and may hook the construction and
/// destruction of values placed in them. Strategies are not tied to an element type: a
/// [`TypedAllocator`] provides the typed view and the ability to [rebind](TypedAllocator::rebind)
/// to another type.
///
/// # Safety
///
/// A block returned by `allocate` must be valid for reads and writes of `layout` and must stay
/// valid until it is passed to `deallocate` on this strategy or a clone of it, with the same
/// layout.
///
/// # Examples
///
/// ```
/// # use std::{alloc::Layout, ptr::NonNull};
/// # use tandem::{AllocError, Allocator, Global, SharedPtr};
/// #[derive(Clone)]
/// struct Quiet;
///
/// unsafe impl Allocator for Quiet {
///     fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
///         Global.allocate(layout)
///     }
///
///     unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
///         unsafe { Global.deallocate(ptr, layout) }
///     }
/// }
///
/// let s = SharedPtr::new_in(5, Quiet).unwrap();
/// assert!(*s == 5);
/// ```
pub unsafe trait Allocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this strategy (or a clone) with the same `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Moves `value` into `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned.
    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { ptr.write(value) }
    }

    /// Drops the value at `ptr` in place.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value that is not used afterwards.
    unsafe fn destroy<T>(&self, ptr: NonNull<T>) {
        unsafe { ptr.drop_in_place() }
    }
}

unsafe impl<A> Allocator for &A
where
    A: Allocator,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { (**self).construct(ptr, value) }
    }

    unsafe fn destroy<T>(&self, ptr: NonNull<T>) {
        unsafe { (**self).destroy(ptr) }
    }
}

/// The global memory allocator, [`std::alloc::alloc`] and [`std::alloc::dealloc`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // zero sized requests never touch the heap, any aligned address will do.
            return Ok(unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) });
        }

        NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or(AllocError::Exhausted(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

/// An allocation strategy viewed as an allocator of `T`s.
///
/// ```
/// # use tandem::{Global, TypedAllocator};
/// let bytes = TypedAllocator::<u8, _>::new(Global);
/// let words = bytes.rebind::<u64>();
///
/// let ptr = words.allocate(4).unwrap();
/// unsafe { words.deallocate(ptr, 4) };
/// ```
pub struct TypedAllocator<T, A> {
    alloc: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T, A> TypedAllocator<T, A> {
    pub const fn new(alloc: A) -> Self {
        TypedAllocator {
            alloc,
            _marker: PhantomData,
        }
    }

    /// Retargets the same strategy to another element type.
    pub fn rebind<U>(self) -> TypedAllocator<U, A> {
        TypedAllocator::new(self.alloc)
    }

    pub fn inner(&self) -> &A {
        &self.alloc
    }

    pub fn into_inner(self) -> A {
        self.alloc
    }
}

impl<T, A> TypedAllocator<T, A>
where
    A: Allocator,
{
    /// Allocates uninitialized room for `n` values of `T`.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::array::<T>(n).map_err(|_| AllocError::CapacityOverflow(n))?;
        self.alloc.allocate(layout).map(NonNull::cast)
    }

    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) with the same `n`, on this strategy or a
    /// clone of it rebound to `T`.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        unsafe {
            let layout = Layout::array::<T>(n).unwrap_unchecked();
            self.alloc.deallocate(ptr.cast(), layout)
        }
    }

    /// # Safety
    ///
    /// See [`Allocator::construct`].
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        unsafe { self.alloc.construct(ptr, value) }
    }

    /// # Safety
    ///
    /// See [`Allocator::destroy`].
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        unsafe { self.alloc.destroy(ptr) }
    }
}

impl<T, A> Clone for TypedAllocator<T, A>
where
    A: Clone,
{
    fn clone(&self) -> Self {
        TypedAllocator::new(self.alloc.clone())
    }
}

impl<T, A> fmt::Debug for TypedAllocator<T, A>
where
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedAllocator")
            .field(&std::any::type_name::<T>())
            .field(&self.alloc)
            .finish()
    }
}
