use std::{alloc::Layout, convert::Infallible};

/// An allocation strategy could not provide the requested memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The strategy has no memory left for this layout.
    #[error("memory allocation of {} bytes failed", .0.size())]
    Exhausted(Layout),
    /// The requested number of elements does not fit into a [`Layout`].
    #[error("allocation of {0} elements exceeds the address space")]
    CapacityOverflow(usize),
}

/// Failure to construct a [`SharedPtr`](crate::SharedPtr) in place.
///
/// `E` is the error type of the constructor closure passed to
/// [`SharedPtr::try_new_with`](crate::SharedPtr::try_new_with).
#[derive(Debug, thiserror::Error)]
pub enum Error<E = Infallible> {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("failed to construct the managed value")]
    Construct(#[source] E),
}

pub(crate) fn alloc_failure(err: AllocError) -> ! {
    match err {
        AllocError::Exhausted(layout) => std::alloc::handle_alloc_error(layout),
        AllocError::CapacityOverflow(_) => panic!("{err}"),
    }
}
