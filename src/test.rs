use crate::{
    block::Counts, external::ExternalControlBlock, guard::AllocationGuard, AllocError, Allocator,
    Error, Global, SharedPtr, TypedAllocator, WeakPtr,
};
use std::{
    alloc::Layout,
    convert::Infallible,
    fmt,
    mem::drop,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering::SeqCst},
    sync::Arc,
    thread,
};

#[derive(Default)]
struct Stats {
    allocs: AtomicUsize,
    deallocs: AtomicUsize,
    constructs: AtomicUsize,
    destroys: AtomicUsize,
}

#[derive(Clone, Default)]
struct Counting(Arc<Stats>);

impl Counting {
    fn allocs(&self) -> usize {
        self.0.allocs.load(SeqCst)
    }

    fn deallocs(&self) -> usize {
        self.0.deallocs.load(SeqCst)
    }

    fn constructs(&self) -> usize {
        self.0.constructs.load(SeqCst)
    }

    fn destroys(&self) -> usize {
        self.0.destroys.load(SeqCst)
    }
}

unsafe impl Allocator for Counting {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.0.allocs.fetch_add(1, SeqCst);
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.0.deallocs.fetch_add(1, SeqCst);
        unsafe { Global.deallocate(ptr, layout) }
    }

    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        self.0.constructs.fetch_add(1, SeqCst);
        unsafe { ptr.write(value) }
    }

    unsafe fn destroy<T>(&self, ptr: NonNull<T>) {
        self.0.destroys.fetch_add(1, SeqCst);
        unsafe { ptr.drop_in_place() }
    }
}

#[derive(Clone, Copy)]
struct Exhausted;

unsafe impl Allocator for Exhausted {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::Exhausted(layout))
    }

    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {
        unreachable!("nothing was ever allocated");
    }
}

struct Widget {
    id: u32,
    drops: Arc<AtomicUsize>,
}

impl Widget {
    fn new(id: u32, drops: &Arc<AtomicUsize>) -> Self {
        Widget {
            id,
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.drops.fetch_add(1, SeqCst);
    }
}

#[test]
fn t001() {
    let drops = Arc::new(AtomicUsize::new(0));

    let mut h1 = SharedPtr::new(Widget::new(42, &drops));
    assert!(h1.use_count() == 1);
    assert!(h1.id == 42);

    let mut h2 = h1.clone();
    assert!(h1.use_count() == 2);

    let w = h1.downgrade();
    assert!(!w.expired());
    assert!(w.weak_count() == 1);

    h1.reset();
    assert!(!w.expired());
    h2.reset();
    assert!(w.expired());
    assert!(w.lock().is_null());
    assert!(drops.load(SeqCst) == 1);
}

#[test]
fn t002() {
    let a = SharedPtr::new(5);
    let b = a.clone();
    assert!(a.use_count() == 2);

    let mut c = b.clone();
    let d = c.take();
    assert!(c.is_null());
    assert!(c.use_count() == 0);
    assert!(c.get().is_none());
    assert!(d.use_count() == 3);

    let mut e: SharedPtr<i32> = SharedPtr::null();
    e.clone_from(&d);
    assert!(e.use_count() == 4);

    e = e.clone();
    assert!(e.use_count() == 4);

    let mut f = SharedPtr::new(6);
    f.swap(&mut e);
    assert!(*f == 5);
    assert!(*e == 6);
    assert!(e.use_count() == 1);

    drop(a);
    drop(b);
    let moved = d;
    assert!(moved.use_count() == 2);
    assert!(moved.as_ptr() == f.as_ptr());
}

#[test]
fn t003() {
    let alloc = Counting::default();
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let s = SharedPtr::new_in(Widget::new(1, &drops), alloc.clone()).unwrap();
        let _t = s.clone();
        assert!(alloc.allocs() == 1);
        assert!(alloc.constructs() == 1);
    }

    assert!(drops.load(SeqCst) == 1);
    assert!(alloc.allocs() == 1);
    assert!(alloc.deallocs() == 1);
    assert!(alloc.destroys() == 1);
}

#[test]
fn t004() {
    let alloc = Counting::default();
    let drops = Arc::new(AtomicUsize::new(0));

    let s = SharedPtr::new_in(Widget::new(2, &drops), alloc.clone()).unwrap();
    let w1 = s.downgrade();
    let w2 = WeakPtr::from(&s);
    assert!(s.weak_count() == 2);
    assert!(w1.use_count() == 1);

    drop(s);
    assert!(drops.load(SeqCst) == 1);
    assert!(alloc.deallocs() == 0);
    assert!(w1.expired());
    assert!(w1.upgrade().is_none());
    assert!(w2.lock().is_null());
    assert!(w2.weak_count() == 2);

    drop(w1);
    assert!(alloc.deallocs() == 0);
    drop(w2);
    assert!(alloc.deallocs() == 1);
    assert!(drops.load(SeqCst) == 1);
}

#[test]
fn t005() {
    let s = SharedPtr::new(String::from("a"));
    let _s2 = s.clone();
    let w = s.downgrade();

    let before = s.use_count();
    let locked = w.lock();
    assert!(!locked.is_null());
    assert!(locked.use_count() == before + 1);
    assert!(*locked == "a");

    drop(locked);
    assert!(s.use_count() == before);
}

#[test]
fn t006() {
    let alloc = Counting::default();
    {
        let s = SharedPtr::new_in(7u64, alloc.clone()).unwrap();
        assert!(*s == 7);
    }
    assert!(alloc.allocs() == 1);
    assert!(alloc.deallocs() == 1);

    let alloc = Counting::default();
    {
        let values = TypedAllocator::<u64, _>::new(alloc.clone());
        let ptr = values.allocate(1).unwrap();
        unsafe { values.construct(ptr, 7) };

        let deleter = move |ptr: NonNull<u64>| unsafe {
            values.destroy(ptr);
            values.deallocate(ptr, 1);
        };
        let s = unsafe { SharedPtr::from_raw_in(ptr, deleter, alloc.clone()) }.unwrap();
        assert!(*s == 7);
        assert!(s.as_ptr() == Some(ptr));
    }
    assert!(alloc.allocs() == 2);
    assert!(alloc.deallocs() == 2);
}

#[test]
fn t007() {
    let alloc = Counting::default();
    let drops = Arc::new(AtomicUsize::new(0));

    let result = SharedPtr::<Widget>::try_new_with(alloc.clone(), |_| Err("boom"));
    assert!(matches!(result, Err(Error::Construct("boom"))));
    assert!(alloc.allocs() == 1);
    assert!(alloc.deallocs() == 1);
    assert!(alloc.constructs() == 0);
    assert!(drops.load(SeqCst) == 0);

    // the constructor sees the strategy that was moved into the block.
    let s = SharedPtr::try_new_with(alloc.clone(), |inner: &Counting| {
        assert!(inner.allocs() == 2);
        Ok::<_, Infallible>(Widget::new(3, &drops))
    })
    .unwrap();
    assert!(s.id == 3);
    drop(s);
    assert!(drops.load(SeqCst) == 1);
    assert!(alloc.deallocs() == 2);
}

#[test]
fn t008() {
    let drops = Arc::new(AtomicUsize::new(0));
    let deleted = Arc::new(AtomicUsize::new(0));

    let ptr = NonNull::from(Box::leak(Box::new(Widget::new(4, &drops))));
    let counter = Arc::clone(&deleted);
    let deleter = move |ptr: NonNull<Widget>| {
        counter.fetch_add(1, SeqCst);
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    };

    let result = unsafe { SharedPtr::from_raw_in(ptr, deleter, Exhausted) };
    assert!(matches!(result, Err(AllocError::Exhausted(_))));
    assert!(deleted.load(SeqCst) == 1);
    assert!(drops.load(SeqCst) == 1);

    let mut called = false;
    let result = SharedPtr::try_new_with(Exhausted, |_| {
        called = true;
        Ok::<_, Infallible>(Widget::new(5, &drops))
    });
    assert!(matches!(result, Err(Error::Alloc(AllocError::Exhausted(_)))));
    assert!(!called);
    assert!(drops.load(SeqCst) == 1);
}

#[test]
fn t009() {
    let boxed: Box<dyn fmt::Display + Send + Sync> = Box::new(5u8);
    let s = SharedPtr::from_box(boxed);
    assert!(s.to_string() == "5");
    assert!(s.use_count() == 1);

    let drops = Arc::new(AtomicUsize::new(0));
    let raw = NonNull::from(Box::leak(Box::new(Widget::new(6, &drops))));
    let s = unsafe { SharedPtr::from_raw(raw) };
    let w = s.downgrade();
    drop(s);
    assert!(drops.load(SeqCst) == 1);
    assert!(w.expired());

    let s: SharedPtr<str> = SharedPtr::from(Box::<str>::from("boxed"));
    assert!(&*s == "boxed");
}

#[test]
fn t010() {
    struct Pair {
        left: String,
        right: u32,
    }

    let s = SharedPtr::new(Pair {
        left: String::from("l"),
        right: 9,
    });
    let w = s.downgrade();

    let left: SharedPtr<str> = s.clone().project(|pair| pair.left.as_str());
    assert!(&*left == "l");
    assert!(s.use_count() == 2);

    let right: WeakPtr<u32> = w.project(|pair| &pair.right).unwrap();
    assert!(*right.lock() == 9);

    drop(s);
    assert!(!w.expired());
    assert!(!right.expired());
    assert!(left.use_count() == 1);

    drop(left);
    assert!(w.expired());
    assert!(right.expired());
    assert!(w.project(|pair| &pair.right).is_none());

    let empty: SharedPtr<Pair> = SharedPtr::null();
    assert!(empty.project(|pair| &pair.right).is_null());
}

#[test]
fn t011() {
    let s = SharedPtr::new(String::from("c"));
    let w = s.downgrade();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let w = w.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    if let Some(s) = w.upgrade() {
                        assert!(*s == "c");
                    }
                }
            })
        })
        .collect();

    drop(s);
    for t in threads {
        t.join().unwrap();
    }

    assert!(w.expired());
    assert!(w.weak_count() == 1);
}

#[test]
fn t012() {
    let s = SharedPtr::new(Arc::new(1));
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let s = s.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let t = s.clone();
                    let w = t.downgrade();
                    assert!(!w.expired());
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert!(s.use_count() == 1);
    assert!(s.weak_count() == 0);
}

#[test]
fn t013() {
    let alloc = Counting::default();
    let deleted = Arc::new(AtomicUsize::new(0));

    let ptr = NonNull::from(Box::leak(Box::new(3u8)));
    let counter = Arc::clone(&deleted);
    let deleter = move |ptr: NonNull<u8>| {
        counter.fetch_add(1, SeqCst);
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    };
    let block = ExternalControlBlock::allocate(ptr, deleter, alloc.clone()).unwrap();

    unsafe {
        block.as_ref().add_weak();
        assert!(block.as_ref().use_count() == 1);
        assert!(block.as_ref().weak_count() == 1);

        Counts::release_strong(block);
        assert!(deleted.load(SeqCst) == 1);
        assert!(block.as_ref().use_count() == 0);
        assert!(!block.as_ref().try_add_strong());

        // saturates instead of running the value teardown again.
        Counts::release_strong(block);
        assert!(deleted.load(SeqCst) == 1);
        assert!(block.as_ref().use_count() == 0);
        assert!(block.as_ref().weak_count() == 1);
        assert!(alloc.deallocs() == 0);

        Counts::release_weak(block);
    }

    assert!(alloc.allocs() == 1);
    assert!(alloc.deallocs() == 1);
}

#[test]
fn t014() {
    let alloc = TypedAllocator::<u64, _>::new(Counting::default());

    {
        let _guard = AllocationGuard::allocate(&alloc, 4).unwrap();
    }
    assert!(alloc.inner().allocs() == 1);
    assert!(alloc.inner().deallocs() == 1);

    let guard = AllocationGuard::allocate(&alloc, 1).unwrap();
    let ptr = guard.release();
    assert!(alloc.inner().deallocs() == 1);
    unsafe { alloc.deallocate(ptr, 1) };
    assert!(alloc.inner().deallocs() == 2);

    let bytes = TypedAllocator::<u8, _>::new(Global);
    assert!(matches!(
        bytes.rebind::<u64>().allocate(usize::MAX),
        Err(AllocError::CapacityOverflow(usize::MAX))
    ));

    let empty = TypedAllocator::<(), _>::new(Global);
    let ptr = empty.allocate(3).unwrap();
    unsafe { empty.deallocate(ptr, 3) };
}

#[test]
fn t015() {
    assert!(format!("{:?}", SharedPtr::new(3)) == "3");
    assert!(format!("{:?}", SharedPtr::<u8>::null()) == "null");
    assert!(format!("{:?}", SharedPtr::new(3).downgrade()) == "(Weak)");

    let w = WeakPtr::<u8>::default();
    assert!(w.expired());
    assert!(w.use_count() == 0);
    assert!(w.upgrade().is_none());
}

#[test]
#[should_panic(expected = "dereferenced an empty SharedPtr")]
fn t016() {
    let s = SharedPtr::<u8>::null();
    let _value: u8 = *s;
}

#[test]
fn t017() {
    let s = SharedPtr::new(1);
    let mut w1 = s.downgrade();
    let mut w2 = WeakPtr::null();
    w2.swap(&mut w1);
    assert!(w1.expired());
    assert!(!w2.expired());

    let w3 = w2.take();
    assert!(w2.expired());
    assert!(s.weak_count() == 1);

    let mut w4 = w3.clone();
    assert!(s.weak_count() == 2);
    w4.reset();
    assert!(s.weak_count() == 1);
    drop(w3);
    assert!(s.weak_count() == 0);
}

#[cfg(feature = "pool")]
#[test]
fn t018() {
    use crate::{PoolAllocator, PoolConfig};

    let pool = PoolAllocator::with_config(PoolConfig::new().capacity(1));

    let first = SharedPtr::new_in(1u32, pool.clone()).unwrap();
    let second = SharedPtr::new_in(2u32, pool.clone()).unwrap();
    let addr = first.as_ptr();

    drop(first);
    drop(second);
    assert!(pool.cached() == 1);

    let third = SharedPtr::new_in(3u32, pool.clone()).unwrap();
    assert!(pool.cached() == 0);
    assert!(*third == 3);
    assert!(third.as_ptr() == addr);

    // other layouts bypass the pool.
    let other = SharedPtr::new_in([4u64; 4], pool.clone()).unwrap();
    drop(other);
    assert!(pool.cached() == 0);
}

#[test]
fn t019() {
    let alloc = Counting::default();
    let drops = Arc::new(AtomicUsize::new(0));

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        SharedPtr::try_new_with(alloc.clone(), |_| -> Result<Widget, Infallible> {
            panic!("constructor panicked")
        })
    }));

    assert!(result.is_err());
    assert!(alloc.allocs() == 1);
    assert!(alloc.deallocs() == 1);
    assert!(alloc.constructs() == 0);
    assert!(drops.load(SeqCst) == 0);
    // the strategy moved into the block was dropped on the way out.
    assert!(Arc::strong_count(&alloc.0) == 1);
}
