//! Rust global allocator host for hugeheap.
//!
//! [`GrowableHeap`] is a `GlobalAlloc` that manages a
//! [`linked_list_allocator::Heap`] and enlarges it through an installed
//! [`MemoryRegionProvider`]. Whatever the provider cannot serve is taken from
//! [`std::alloc::System`], so a failed growth never fails an allocation.
//!
//! ```no_run
//! use hugeheap_core::{MorecoreConfig, setup_morecore};
//! use hugeheap_hugetlbfs::Hugetlbfs;
//! use hugeheap_llheap::GrowableHeap;
//!
//! #[global_allocator]
//! static HEAP: GrowableHeap = GrowableHeap::new();
//!
//! fn main() {
//!     let _ = setup_morecore(&MorecoreConfig::from_env(), &Hugetlbfs::default(), &mut &HEAP);
//!     let v = vec![0u8; 1 << 20];
//!     assert!(HEAP.contains(v.as_ptr()) || std::env::var_os("HUGETLB_MORECORE").is_none());
//! }
//! ```

#![warn(missing_docs)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use hugeheap_core::HeapState;
use hugeheap_core::host::{HostAllocator, Tunable};
use hugeheap_core::provider::MemoryRegionProvider;
use linked_list_allocator::Heap;
use log::{debug, warn};
use serde::Serialize;
use spin::Mutex;
use thiserror::Error;

/// Requests of at least this size are candidates for direct mapping.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Smallest free block the heap can track (one hole header).
const MIN_CHUNK: usize = 2 * size_of::<usize>();

/// Bytes to request from the provider so that `layout` fits behind the
/// current heap end, keeping that end `usize`-aligned.
///
/// The heap pads every block to [`MIN_CHUNK`] and may have to split off a
/// leading hole of at least [`MIN_CHUNK`] bytes to honor the alignment. A
/// trailing remainder must be empty or hold a hole as well.
fn growth_for(layout: Layout, top_pad: usize) -> Option<usize> {
    layout
        .size()
        .max(MIN_CHUNK)
        .checked_next_multiple_of(align_of::<usize>())?
        .checked_add(layout.align())?
        .checked_add(2 * MIN_CHUNK)?
        .checked_add(top_pad)?
        .checked_next_multiple_of(align_of::<usize>())
}

thread_local! {
    static IN_HEAP: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as being inside the heap lock.
struct Reentry;

impl Reentry {
    /// Returns `None` if the thread already is inside.
    fn enter() -> Option<Reentry> {
        if IN_HEAP.with(|f| f.replace(true)) {
            None
        } else {
            Some(Reentry)
        }
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        IN_HEAP.with(|f| f.set(false));
    }
}

/// Tuning knobs of [`GrowableHeap`], defaults as in glibc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Tunables {
    /// Recorded for inspection; the heap never gives memory back.
    pub trim_threshold: usize,
    /// Extra bytes requested from the provider on every growth.
    pub top_pad: usize,
    /// Zero routes large requests through the provider, anything else lets
    /// them bypass it via [`System`].
    pub mmap_max: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Tunables {
    const DEFAULT: Tunables = Tunables {
        trim_threshold: 128 * 1024,
        top_pad: 128 * 1024,
        mmap_max: 65536,
    };
}

/// Errors reported by [`GrowableHeap`] as a host.
#[derive(Debug, Error)]
pub enum Error {
    /// A growth hook has already been installed.
    #[error("A growth hook is already installed")]
    AlreadyInstalled,
}

struct Inner {
    heap: Heap,
    hook: Option<Box<dyn MemoryRegionProvider + Send>>,
    tunables: Tunables,
}

impl Inner {
    fn bypasses_hook(&self, layout: Layout) -> bool {
        self.tunables.mmap_max > 0 && layout.size() >= MMAP_THRESHOLD
    }

    /// Grows the heap so that `layout` fits at its end.
    fn grow_for(&mut self, layout: Layout) -> Option<()> {
        let hook = self.hook.as_mut()?;
        let need = growth_for(layout, self.tunables.top_pad)?;
        let increment = isize::try_from(need).ok()?;
        let old = match hook.grow(increment) {
            Ok(old) => old,
            Err(e) => {
                debug!("Heap growth by {} failed: {}", need, e);
                return None;
            }
        };
        if self.heap.size() == 0 {
            unsafe { self.heap.init(old as *mut u8, need) };
        } else if old == self.heap.top() as usize {
            unsafe { self.heap.extend(need) };
        } else {
            debug!(
                "Provider returned 0x{:x}, heap ends at {:p}",
                old,
                self.heap.top()
            );
            if let Err(e) = hook.grow(-increment) {
                warn!("Failed to hand back {} bytes at 0x{:x}: {}", need, old, e);
            }
            return None;
        }
        Some(())
    }
}

/// A global allocator whose heap grows through a [`MemoryRegionProvider`].
///
/// Until a hook is installed every request goes to [`System`].
pub struct GrowableHeap {
    inner: Mutex<Inner>,
    bottom: AtomicUsize,
    top: AtomicUsize,
}

impl Default for GrowableHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl GrowableHeap {
    /// Creates a heap without a growth hook.
    pub const fn new() -> Self {
        GrowableHeap {
            inner: Mutex::new(Inner {
                heap: Heap::empty(),
                hook: None,
                tunables: Tunables::DEFAULT,
            }),
            bottom: AtomicUsize::new(0),
            top: AtomicUsize::new(0),
        }
    }

    /// Whether `ptr` points into the provider-backed heap.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let p = ptr as usize;
        self.bottom.load(Ordering::Acquire) <= p && p < self.top.load(Ordering::Acquire)
    }

    /// Returns the provider bookkeeping, if a hook is installed.
    pub fn state(&self) -> Option<HeapState> {
        self.inner.lock().hook.as_ref().map(|h| h.state())
    }

    /// Returns the current tuning.
    pub fn tunables(&self) -> Tunables {
        self.inner.lock().tunables
    }

    /// Bytes currently allocated from the provider-backed heap.
    pub fn used(&self) -> usize {
        self.inner.lock().heap.used()
    }

    fn publish_bounds(&self, heap: &Heap) {
        self.bottom.store(heap.bottom() as usize, Ordering::Release);
        self.top.store(heap.top() as usize, Ordering::Release);
    }
}

unsafe impl GlobalAlloc for GrowableHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // allocations made while growing (e.g. by a logger) cannot wait for us
        let Some(_reentry) = Reentry::enter() else {
            return unsafe { System.alloc(layout) };
        };
        let mut inner = self.inner.lock();
        if inner.hook.is_none() || inner.bypasses_hook(layout) {
            drop(inner);
            return unsafe { System.alloc(layout) };
        }
        if let Ok(p) = inner.heap.allocate_first_fit(layout) {
            return p.as_ptr();
        }
        if inner.grow_for(layout).is_some() {
            self.publish_bounds(&inner.heap);
            if let Ok(p) = inner.heap.allocate_first_fit(layout) {
                return p.as_ptr();
            }
        }
        drop(inner);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if !self.contains(ptr) {
            return unsafe { System.dealloc(ptr, layout) };
        }
        // freeing heap memory from inside the lock would deadlock; leak it
        let Some(_reentry) = Reentry::enter() else {
            return;
        };
        if let Some(p) = NonNull::new(ptr) {
            unsafe { self.inner.lock().heap.deallocate(p, layout) };
        }
    }
}

impl HostAllocator for &GrowableHeap {
    type Error = Error;

    fn install_growth_hook(
        &mut self,
        hook: Box<dyn MemoryRegionProvider + Send>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.hook.is_some() {
            return Err(Error::AlreadyInstalled);
        }
        inner.hook = Some(hook);
        Ok(())
    }

    fn set_tunable(&mut self, tunable: Tunable, value: usize) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match tunable {
            Tunable::TrimThreshold => inner.tunables.trim_threshold = value,
            Tunable::TopPad => inner.tunables.top_pad = value,
            Tunable::MmapMax => inner.tunables.mmap_max = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hugeheap_core::mapper::FdMapper;
    use hugeheap_core::util::PAGE_SIZE;
    use hugeheap_core::{GrowError, Morecore};
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::sync::Arc;

    const PAGES: usize = 512;

    fn memfd_morecore() -> Box<dyn MemoryRegionProvider + Send> {
        let len = PAGES * PAGE_SIZE;
        let fd = unsafe { libc::memfd_create(c"llheap-test".as_ptr(), libc::MFD_CLOEXEC) };
        assert!(fd >= 0);
        assert_eq!(unsafe { libc::ftruncate(fd, len as libc::off_t) }, 0);
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // find free address space for the heap to grow into
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED);
        unsafe { libc::munmap(base, len) };
        Box::new(Morecore::new(
            HeapState::new(base as usize, PAGE_SIZE),
            FdMapper::new(fd),
        ))
    }

    struct Exhausted;

    impl MemoryRegionProvider for Exhausted {
        fn granularity(&self) -> hugeheap_core::util::Size {
            hugeheap_core::util::Size::MB(2)
        }

        fn grow(&mut self, _increment: isize) -> Result<usize, GrowError> {
            Err(GrowError::Overflow)
        }

        fn state(&self) -> HeapState {
            HeapState::new(0, 2 << 20)
        }
    }

    /// Hands out a caller-owned buffer, leaving a gap after the first growth.
    struct Gapped {
        top: usize,
        calls: usize,
        rollbacks: Arc<AtomicUsize>,
    }

    impl MemoryRegionProvider for Gapped {
        fn granularity(&self) -> hugeheap_core::util::Size {
            hugeheap_core::util::Size::B(8)
        }

        fn grow(&mut self, increment: isize) -> Result<usize, GrowError> {
            let old = self.top;
            if increment < 0 {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
                self.top -= increment.unsigned_abs();
                return Ok(old);
            }
            self.top += increment as usize;
            if self.calls == 0 {
                self.top += PAGE_SIZE;
            }
            self.calls += 1;
            Ok(old)
        }

        fn state(&self) -> HeapState {
            HeapState::new(self.top, 8)
        }
    }

    fn heap_with_hook() -> anyhow::Result<GrowableHeap> {
        let heap = GrowableHeap::new();
        let mut host = &heap;
        host.install_growth_hook(memfd_morecore())?;
        host.set_tunable(Tunable::TopPad, PAGE_SIZE)?;
        host.set_tunable(Tunable::MmapMax, 0)?;
        Ok(heap)
    }

    #[test]
    fn without_hook_uses_system() {
        let heap = GrowableHeap::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            assert!(!p.is_null());
            assert!(!heap.contains(p));
            heap.dealloc(p, layout);
        }
        assert!(heap.state().is_none());
    }

    #[test]
    fn allocations_come_from_provider() -> anyhow::Result<()> {
        let heap = heap_with_hook()?;
        let layout = Layout::from_size_align(1000, 16).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            assert!(heap.contains(p));
            std::ptr::write_bytes(p, 0x11, 1000);
            let state = heap.state().expect("hook installed");
            assert_eq!(state.used(), 1000 + 16 + 2 * MIN_CHUNK + PAGE_SIZE);
            assert_eq!(state.heapbase, p as usize & !(PAGE_SIZE - 1));
            assert_eq!(heap.used(), 1000);
            heap.dealloc(p, layout);
            assert_eq!(heap.used(), 0);
            let q = heap.alloc(layout);
            assert_eq!(p, q);
            heap.dealloc(q, layout);
        }
        Ok(())
    }

    #[test]
    fn tiny_allocations_without_top_pad() -> anyhow::Result<()> {
        let heap = heap_with_hook()?;
        let mut host = &heap;
        host.set_tunable(Tunable::TopPad, 0)?;
        let layouts = [
            Layout::from_size_align(1, 1).unwrap(),
            Layout::from_size_align(3, 2).unwrap(),
            Layout::from_size_align(24, 64).unwrap(),
            Layout::from_size_align(1, 4096).unwrap(),
        ];
        let ptrs: Vec<*mut u8> = layouts
            .iter()
            .map(|layout| unsafe { heap.alloc(*layout) })
            .collect();
        for (p, layout) in ptrs.iter().zip(&layouts) {
            assert!(heap.contains(*p));
            assert_eq!(*p as usize % layout.align(), 0);
            unsafe { std::ptr::write_bytes(*p, 0xee, layout.size()) };
        }
        assert!(heap.state().expect("hook installed").is_consistent());
        for (p, layout) in ptrs.into_iter().zip(layouts) {
            unsafe { heap.dealloc(p, layout) };
        }
        assert_eq!(heap.used(), 0);
        Ok(())
    }

    #[test]
    fn growth_for_covers_padding() {
        let layout = Layout::from_size_align(1, 1).unwrap();
        assert_eq!(growth_for(layout, 0), Some(3 * MIN_CHUNK + 8));
        let layout = Layout::from_size_align(1000, 16).unwrap();
        assert_eq!(growth_for(layout, 3), Some(1000 + 16 + 2 * MIN_CHUNK + 8));
        assert_eq!(growth_for(layout, usize::MAX), None);
    }

    #[test]
    fn misplaced_growth_is_handed_back() -> anyhow::Result<()> {
        let buf = vec![0u64; 2 * PAGE_SIZE / 8];
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let heap = GrowableHeap::new();
        let mut host = &heap;
        host.install_growth_hook(Box::new(Gapped {
            top: buf.as_ptr() as usize,
            calls: 0,
            rollbacks: rollbacks.clone(),
        }))?;
        host.set_tunable(Tunable::TopPad, 0)?;

        let small = Layout::from_size_align(64, 8).unwrap();
        let big = Layout::from_size_align(1024, 8).unwrap();
        unsafe {
            let p = heap.alloc(small);
            assert!(heap.contains(p));
            // the next growth lands a page behind the heap end
            let q = heap.alloc(big);
            assert!(!q.is_null());
            assert!(!heap.contains(q));
            assert_eq!(rollbacks.load(Ordering::Relaxed), 1);
            assert_eq!(heap.used(), 64);
            heap.dealloc(q, big);
            heap.dealloc(p, small);
        }
        drop(heap);
        drop(buf);
        Ok(())
    }

    #[test]
    fn heap_extends_contiguously() -> anyhow::Result<()> {
        let heap = heap_with_hook()?;
        let layout = Layout::from_size_align(3 * PAGE_SIZE, 8).unwrap();
        let ptrs: Vec<*mut u8> = (0..10).map(|_| unsafe { heap.alloc(layout) }).collect();
        assert!(ptrs.iter().all(|p| heap.contains(*p)));
        let state = heap.state().expect("hook installed");
        assert!(state.is_consistent());
        assert!(state.mapsize >= 30 * PAGE_SIZE);
        for p in ptrs {
            unsafe { heap.dealloc(p, layout) };
        }
        Ok(())
    }

    #[test]
    fn large_requests_bypass_hook_unless_disabled() -> anyhow::Result<()> {
        let heap = heap_with_hook()?;
        let layout = Layout::from_size_align(MMAP_THRESHOLD, 8).unwrap();
        let mut host = &heap;
        host.set_tunable(Tunable::MmapMax, 1)?;
        unsafe {
            let p = heap.alloc(layout);
            assert!(!heap.contains(p));
            heap.dealloc(p, layout);
        }
        host.set_tunable(Tunable::MmapMax, 0)?;
        unsafe {
            let p = heap.alloc(layout);
            assert!(heap.contains(p));
            heap.dealloc(p, layout);
        }
        Ok(())
    }

    #[test]
    fn failed_growth_falls_back_to_system() -> anyhow::Result<()> {
        let heap = GrowableHeap::new();
        let mut host = &heap;
        host.install_growth_hook(Box::new(Exhausted))?;
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            assert!(!p.is_null());
            assert!(!heap.contains(p));
            heap.dealloc(p, layout);
        }
        Ok(())
    }

    #[test]
    fn second_hook_is_rejected() -> anyhow::Result<()> {
        let heap = heap_with_hook()?;
        let mut host = &heap;
        assert!(matches!(
            host.install_growth_hook(Box::new(Exhausted)),
            Err(Error::AlreadyInstalled)
        ));
        Ok(())
    }

    #[test]
    fn tunables_are_recorded() -> anyhow::Result<()> {
        let heap = GrowableHeap::new();
        assert_eq!(heap.tunables(), Tunables::default());
        let mut host = &heap;
        host.set_tunable(Tunable::TrimThreshold, 1 << 20)?;
        assert_eq!(heap.tunables().trim_threshold, 1 << 20);
        Ok(())
    }
}
