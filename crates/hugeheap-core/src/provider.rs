//! The capability a host allocator consumes to enlarge its heap.
//!
//! This module defines the [`MemoryRegionProvider`] trait, the seam between a
//! host allocator (glibc malloc, a Rust `GlobalAlloc`, ...) and the backend
//! that supplies the memory behind its heap.

use crate::HeapState;
use crate::morecore::GrowError;
use crate::util::Size;

/// A growable, contiguous memory region with `sbrk` semantics.
///
/// Implementors hand out one unbroken address range that only ever grows at
/// its end. Hosts call [`grow`](MemoryRegionProvider::grow) whenever they
/// need more heap and treat an error as "no memory available from this
/// provider", falling back to their own strategy for that request.
///
/// # Required Methods
///
/// Implementors must provide:
/// * [`granularity()`](MemoryRegionProvider::granularity) - The unit in which backing is acquired
/// * [`grow()`](MemoryRegionProvider::grow) - Moves the end of the region
/// * [`state()`](MemoryRegionProvider::state) - Snapshot of the region bookkeeping
///
/// # Concurrency
///
/// `grow` takes `&mut self`; hosts must serialize calls, which they usually
/// do with the lock they already hold while manipulating their heap.
pub trait MemoryRegionProvider {
    /// Returns the granularity in which backing memory is acquired.
    ///
    /// Hosts should scale their trim and padding heuristics to this value.
    fn granularity(&self) -> Size;

    /// Moves the end of the region by `increment` bytes and returns the
    /// previous end.
    ///
    /// A positive `increment` extends the region, a negative one shrinks it
    /// and zero queries the current end.
    ///
    /// # Errors
    ///
    /// Returns an error if the region could not be extended. The region is
    /// left exactly as it was before the call.
    fn grow(&mut self, increment: isize) -> Result<usize, GrowError>;

    /// Returns a snapshot of the region bookkeeping.
    fn state(&self) -> HeapState;

    /// Returns the current end of the region.
    fn top(&self) -> usize {
        self.state().heaptop
    }
}

impl<P: MemoryRegionProvider + ?Sized> MemoryRegionProvider for Box<P> {
    fn granularity(&self) -> Size {
        (**self).granularity()
    }

    fn grow(&mut self, increment: isize) -> Result<usize, GrowError> {
        (**self).grow(increment)
    }

    fn state(&self) -> HeapState {
        (**self).state()
    }
}
