use std::{
    alloc::Layout,
    fmt,
    ptr::NonNull,
    sync::{Arc, OnceLock},
};

use crossbeam::channel;

use crate::{AllocError, Allocator, Global};

const DEFAULT_CAPACITY: usize = 64;

/// Settings for a [`PoolAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    capacity: Option<usize>,
}

impl PoolConfig {
    pub const fn new() -> Self {
        PoolConfig {
            capacity: Some(DEFAULT_CAPACITY),
        }
    }

    /// Keep at most `capacity` freed blocks around for reuse. Blocks beyond that are returned
    /// to the global allocator right away.
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Keep every freed block for reuse.
    pub const fn unbounded(mut self) -> Self {
        self.capacity = None;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct AllowSend<T>(T);

unsafe impl<T> Send for AllowSend<T> {}

struct Pool {
    layout: OnceLock<Layout>,
    sender: channel::Sender<AllowSend<NonNull<u8>>>,
    receiver: channel::Receiver<AllowSend<NonNull<u8>>>,
}

impl Pool {
    // the pool binds to the first layout it is asked for.
    fn accepts(&self, layout: Layout) -> bool {
        *self.layout.get_or_init(|| layout) == layout
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let Some(layout) = self.layout.get().copied() else {
            return;
        };

        while let Ok(block) = self.receiver.try_recv() {
            unsafe { Global.deallocate(block.0, layout) }
        }
    }
}

/// An allocation strategy that recycles freed blocks.
///
/// Control blocks of one `SharedPtr<T>` type all have the same layout, so a pool used for a
/// single value type hands the memory of dropped pointers to the next one instead of going
/// through the global allocator again. The pool binds to the layout of its first allocation;
/// other layouts are served by [`Global`] directly.
///
/// Clones share the same pool.
///
/// ```
/// # use tandem::{PoolAllocator, SharedPtr};
/// let pool = PoolAllocator::new();
///
/// let first = SharedPtr::new_in(1u32, pool.clone()).unwrap();
/// let addr = first.as_ptr();
/// drop(first);
/// assert!(pool.cached() == 1);
///
/// let second = SharedPtr::new_in(2u32, pool.clone()).unwrap();
/// assert!(second.as_ptr() == addr);
/// ```
#[derive(Clone)]
pub struct PoolAllocator {
    pool: Arc<Pool>,
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("layout", &self.pool.layout.get())
            .field("cached", &self.cached())
            .finish()
    }
}

impl PoolAllocator {
    /// Creates a pool with the default [`PoolConfig`].
    pub fn new() -> Self {
        Self::with_config(PoolConfig::new())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        let (sender, receiver) = match config.capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        PoolAllocator {
            pool: Arc::new(Pool {
                layout: OnceLock::new(),
                sender,
                receiver,
            }),
        }
    }

    /// The number of freed blocks waiting to be reused.
    pub fn cached(&self) -> usize {
        self.pool.receiver.len()
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Allocator for PoolAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if self.pool.accepts(layout) {
            if let Ok(block) = self.pool.receiver.try_recv() {
                log::trace!("reusing a pooled block of {} bytes", layout.size());
                return Ok(block.0);
            }
        }

        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if !self.pool.accepts(layout) {
            return unsafe { Global.deallocate(ptr, layout) };
        }

        match self.pool.sender.try_send(AllowSend(ptr)) {
            Ok(()) => log::trace!("returned a block of {} bytes to the pool", layout.size()),
            Err(err) => unsafe { Global.deallocate(err.into_inner().0, layout) },
        }
    }
}
