use std::{
    mem::{self, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::{
    block::{ControlBlock, Counts},
    guard::AllocationGuard,
    Allocator, Error, TypedAllocator,
};

/// Control block that stores the allocation strategy and the value in one allocation.
///
/// `storage` is laid out as the pair `(A, T)`. The two halves are initialized and dropped
/// separately: the strategy is written before the value and outlives it, since it is needed
/// to free the block once the value is gone.
#[repr(C)]
pub(crate) struct InPlaceControlBlock<T, A> {
    counts: Counts,
    storage: MaybeUninit<(A, T)>,
}

/// Drops the strategy slot of a block whose value never finished construction.
struct SlotGuard<A>(NonNull<A>);

impl<A> Drop for SlotGuard<A> {
    fn drop(&mut self) {
        unsafe { self.0.drop_in_place() }
    }
}

impl<T, A> InPlaceControlBlock<T, A>
where
    A: Allocator + Clone,
{
    /// Allocates a block through `alloc` and builds the value in it with `f`, which gets to see
    /// the strategy that now lives in the block.
    ///
    /// On failure nothing is left allocated: the strategy slot is dropped and then the block is
    /// freed, whether `f` returned an error or panicked.
    pub(crate) fn allocate_with<E, F>(alloc: A, f: F) -> Result<(NonNull<Counts>, NonNull<T>), Error<E>>
    where
        F: FnOnce(&A) -> Result<T, E>,
    {
        let block_alloc = TypedAllocator::<Self, A>::new(alloc.clone());
        let guard = AllocationGuard::allocate(&block_alloc, 1)?;
        let block = guard.as_ptr();

        unsafe {
            let alloc_slot = Self::alloc_slot(block);
            alloc_slot.write(alloc);
            let slot_guard = SlotGuard(alloc_slot);
            ptr::addr_of_mut!((*block.as_ptr()).counts).write(Counts::new::<Self>());

            let value = f(alloc_slot.as_ref()).map_err(Error::Construct)?;
            let value_slot = Self::value_slot(block);
            alloc_slot.as_ref().construct(value_slot, value);
            mem::forget(slot_guard);

            log::trace!("constructed {} in place", std::any::type_name::<T>());
            Ok((guard.release().cast(), value_slot))
        }
    }
}

impl<T, A> InPlaceControlBlock<T, A> {
    fn pair(this: NonNull<Self>) -> *mut (A, T) {
        unsafe { ptr::addr_of_mut!((*this.as_ptr()).storage).cast() }
    }

    fn alloc_slot(this: NonNull<Self>) -> NonNull<A> {
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*Self::pair(this)).0)) }
    }

    fn value_slot(this: NonNull<Self>) -> NonNull<T> {
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*Self::pair(this)).1)) }
    }
}

unsafe impl<T, A> ControlBlock for InPlaceControlBlock<T, A>
where
    A: Allocator,
{
    unsafe fn release_value(this: NonNull<Self>) {
        unsafe { Self::alloc_slot(this).as_ref().destroy(Self::value_slot(this)) }
    }

    unsafe fn release_storage(this: NonNull<Self>) {
        unsafe {
            let alloc = Self::alloc_slot(this).read();
            TypedAllocator::<Self, A>::new(alloc).deallocate(this, 1);
        }
    }
}
