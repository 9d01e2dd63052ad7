use std::{mem, ptr::NonNull};

use crate::{AllocError, Allocator, TypedAllocator};

/// Owns `n` freshly allocated, uninitialized units until [`release`](Self::release) is called.
/// Dropping the guard hands the memory back to the strategy, so every early return and every
/// unwind out of a partially built control block frees it.
pub(crate) struct AllocationGuard<'a, T, A>
where
    A: Allocator,
{
    alloc: &'a TypedAllocator<T, A>,
    ptr: NonNull<T>,
    n: usize,
}

impl<'a, T, A> AllocationGuard<'a, T, A>
where
    A: Allocator,
{
    pub(crate) fn allocate(alloc: &'a TypedAllocator<T, A>, n: usize) -> Result<Self, AllocError> {
        let ptr = alloc.allocate(n)?;
        Ok(AllocationGuard { alloc, ptr, n })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Gives up ownership of the allocation.
    pub(crate) fn release(self) -> NonNull<T> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<T, A> Drop for AllocationGuard<'_, T, A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        unsafe { self.alloc.deallocate(self.ptr, self.n) }
    }
}
