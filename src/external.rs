use std::{
    mem::ManuallyDrop,
    ptr::{self, NonNull},
};

use crate::{
    block::{ControlBlock, Counts},
    guard::AllocationGuard,
    AllocError, Allocator, TypedAllocator,
};

/// Control block for a value that lives in its own allocation, adopted through a raw pointer.
///
/// `alloc` is only used to free the block itself, the value is torn down by `deleter`.
#[repr(C)]
pub(crate) struct ExternalControlBlock<T, D, A>
where
    T: ?Sized,
{
    counts: Counts,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T, D, A> ExternalControlBlock<T, D, A>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
    A: Allocator + Clone,
{
    /// Allocates a block adopting `ptr` with one strong reference.
    ///
    /// If the block cannot be allocated `deleter` is run on `ptr` before the error is returned,
    /// so the adopted value is torn down either way.
    pub(crate) fn allocate(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<NonNull<Counts>, AllocError> {
        let block_alloc = TypedAllocator::<Self, A>::new(alloc.clone());
        let guard = match AllocationGuard::allocate(&block_alloc, 1) {
            Ok(guard) => guard,
            Err(err) => {
                deleter(ptr);
                return Err(err);
            }
        };

        unsafe {
            guard.as_ptr().write(ExternalControlBlock {
                counts: Counts::new::<Self>(),
                ptr,
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }

        log::trace!("adopted {} into an external control block", std::any::type_name::<T>());
        Ok(guard.release().cast())
    }
}

unsafe impl<T, D, A> ControlBlock for ExternalControlBlock<T, D, A>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
    A: Allocator,
{
    unsafe fn release_value(this: NonNull<Self>) {
        unsafe {
            let this = this.as_ptr();
            let deleter = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*this).deleter)));
            deleter((*this).ptr);
        }
    }

    unsafe fn release_storage(this: NonNull<Self>) {
        unsafe {
            let alloc = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*this.as_ptr()).alloc)));
            TypedAllocator::<Self, A>::new(alloc).deallocate(this, 1);
        }
    }
}
