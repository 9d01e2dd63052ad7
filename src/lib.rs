//! Reference counted [`SharedPtr`] and [`WeakPtr`] handles with pluggable allocation.
//!
//! A `SharedPtr` owns a strong reference to a control block that counts strong and weak
//! references separately. The managed value is destroyed when the last strong reference is
//! gone, the control block itself when no reference of either kind is left. A [`WeakPtr`]
//! observes the value without keeping it alive and has to be [locked](WeakPtr::lock) to access
//! it.
//!
//! There are two ways to create a pointer:
//!
//! - Construct the value in place with [`SharedPtr::new`], [`SharedPtr::new_in`] or
//!   [`SharedPtr::try_new_with`]. The value and the allocation strategy are stored inside the
//!   control block, so this takes a single allocation. Prefer this.
//! - Adopt a value that already lives somewhere else with [`SharedPtr::from_box`] or
//!   [`SharedPtr::from_raw_in`]. The control block is a second allocation and stores a deleter
//!   that tears the value down.
//!
//! Allocation goes through the [`Allocator`] trait. [`Global`] forwards to the global allocator,
//! [`PoolAllocator`] recycles the blocks of dropped pointers. Failure to allocate or to
//! construct the value is reported as an [`AllocError`] or [`Error`] and never leaks: whatever
//! was allocated or adopted up to that point has been released when the error is returned.
//!
//! Reference counts are atomic, so pointers to `Send + Sync` values can be shared between
//! threads.

mod allocator;
mod block;
mod error;
mod external;
mod guard;
mod in_place;
#[cfg(feature = "pool")]
mod pool;
mod shared;
mod weak;

pub use crate::allocator::{Allocator, Global, TypedAllocator};
pub use crate::error::{AllocError, Error};
#[cfg(feature = "pool")]
pub use crate::pool::{PoolAllocator, PoolConfig};
pub use crate::shared::SharedPtr;
pub use crate::weak::WeakPtr;

#[cfg(test)]
mod test;
