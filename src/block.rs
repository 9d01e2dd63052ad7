use std::{
    process,
    ptr::NonNull,
    sync::atomic::{fence, AtomicUsize, Ordering::Acquire, Ordering::Relaxed, Ordering::Release},
};

// same limit as `std::sync::Arc`, far enough from `usize::MAX` that racing increments cannot wrap.
const MAX_REFCOUNT: usize = isize::MAX as usize;

fn increment(count: &AtomicUsize) {
    if count.fetch_add(1, Relaxed) > MAX_REFCOUNT {
        process::abort();
    }
}

/// Returns the value before the decrement, or `None` if the counter was already zero.
fn saturating_decrement(count: &AtomicUsize) -> Option<usize> {
    count
        .fetch_update(Release, Relaxed, |n| n.checked_sub(1))
        .ok()
}

/// The number of strong references to a managed value.
pub(crate) struct StrongCount {
    strong: AtomicUsize,
}

impl StrongCount {
    const fn new(count: usize) -> Self {
        StrongCount {
            strong: AtomicUsize::new(count),
        }
    }

    pub(crate) fn load(&self) -> usize {
        self.strong.load(Acquire)
    }

    fn increment(&self) {
        increment(&self.strong);
    }

    fn increment_if_nonzero(&self) -> bool {
        let mut n = self.strong.load(Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                process::abort();
            }

            match self
                .strong
                .compare_exchange_weak(n, n + 1, Acquire, Relaxed)
            {
                Ok(_) => return true,
                Err(strong) => n = strong,
            }
        }
    }

    fn decrement(&self) -> Option<usize> {
        saturating_decrement(&self.strong)
    }
}

/// Type erased entry points of a concrete control block.
pub(crate) struct BlockVTable {
    release_value: unsafe fn(NonNull<Counts>),
    release_storage: unsafe fn(NonNull<Counts>),
}

/// The header every control block starts with. Handles only ever hold a `NonNull<Counts>`, the
/// concrete block behind it is reached through `vtable`.
pub(crate) struct Counts {
    strong: StrongCount,
    // `WeakPtr`s, plus one reference held collectively by all `SharedPtr`s while `strong > 0`.
    weak: AtomicUsize,
    vtable: &'static BlockVTable,
}

impl Counts {
    /// A header for a block that is owned by exactly one `SharedPtr`.
    pub(crate) fn new<B>() -> Self
    where
        B: ControlBlock,
    {
        Counts {
            strong: StrongCount::new(1),
            weak: AtomicUsize::new(1),
            vtable: B::VTABLE,
        }
    }

    pub(crate) fn use_count(&self) -> usize {
        self.strong.load()
    }

    /// Number of `WeakPtr`s. Only a snapshot if other threads hold handles to the same block.
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Acquire);
        if self.strong.load() > 0 {
            weak.saturating_sub(1)
        } else {
            weak
        }
    }

    pub(crate) fn add_strong(&self) {
        self.strong.increment();
    }

    /// Takes a strong reference unless the value is already gone. The check and the increment
    /// are a single atomic step.
    pub(crate) fn try_add_strong(&self) -> bool {
        self.strong.increment_if_nonzero()
    }

    pub(crate) fn add_weak(&self) {
        increment(&self.weak);
    }

    /// Drops a strong reference. The last one destroys the value and then gives up the implicit
    /// weak reference, which frees the block if no `WeakPtr` is left.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the strong reference it gives
    /// up.
    pub(crate) unsafe fn release_strong(this: NonNull<Self>) {
        let vtable = unsafe { this.as_ref() }.vtable;

        match unsafe { this.as_ref() }.strong.decrement() {
            Some(1) => {}
            Some(_) => return,
            None => {
                log::warn!("strong count released below zero, ignoring");
                return;
            }
        }

        fence(Acquire);
        unsafe {
            (vtable.release_value)(this);
            Self::release_weak(this);
        }
    }

    /// Drops a weak reference, freeing the block if it was the last reference of any kind.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own the weak reference it gives up.
    pub(crate) unsafe fn release_weak(this: NonNull<Self>) {
        let vtable = unsafe { this.as_ref() }.vtable;

        match saturating_decrement(&unsafe { this.as_ref() }.weak) {
            Some(1) => {}
            Some(_) => return,
            None => {
                log::warn!("weak count released below zero, ignoring");
                return;
            }
        }

        fence(Acquire);
        unsafe { (vtable.release_storage)(this) }
    }
}

/// A concrete control block.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`Counts`] as their first field, so that a pointer to
/// the block and a pointer to its header are interchangeable.
pub(crate) unsafe trait ControlBlock: Sized {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        release_value: erased_release_value::<Self>,
        release_storage: erased_release_storage::<Self>,
    };

    /// Destroys the managed value. Runs once, when the strong count reaches zero.
    ///
    /// # Safety
    ///
    /// `this` must be a live block whose value has not been released yet.
    unsafe fn release_value(this: NonNull<Self>);

    /// Frees the block. Runs once, after [`release_value`](Self::release_value), when the last
    /// reference of either kind is gone.
    ///
    /// # Safety
    ///
    /// `this` must be a live block with a released value and no remaining references.
    unsafe fn release_storage(this: NonNull<Self>);
}

unsafe fn erased_release_value<B>(counts: NonNull<Counts>)
where
    B: ControlBlock,
{
    unsafe { B::release_value(counts.cast()) }
}

unsafe fn erased_release_storage<B>(counts: NonNull<Counts>)
where
    B: ControlBlock,
{
    log::trace!("releasing {}", std::any::type_name::<B>());
    unsafe { B::release_storage(counts.cast()) }
}
