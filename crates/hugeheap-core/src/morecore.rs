//! The growth hook: `sbrk` semantics on top of hugepage mappings.
//!
//! Our plan is to ask for pages roughly at the heap base and to require the
//! kernel to hand out sequential pages from wherever it put the first one. If
//! a later mapping does not land right behind the previous ones, another
//! mapping is in the way: the new mapping is returned and the call fails, and
//! the host allocator falls back to its own way of obtaining memory.

use log::{debug, warn};
use thiserror::Error;

use crate::HeapState;
use crate::mapper::RegionMapper;
use crate::provider::MemoryRegionProvider;
use crate::util::{Size, align_up};

/// Reasons a single growth request can fail.
///
/// None of these are fatal: the heap is left untouched and the host may
/// satisfy the request some other way.
#[derive(Debug, Error)]
pub enum GrowError {
    /// The kernel refused the mapping, usually because the hugepage pool is exhausted.
    #[error("mapping {len} bytes at 0x{hint:x} failed: {source}")]
    Map {
        /// Requested address
        hint: usize,
        /// Requested length
        len: usize,
        /// OS error
        #[source]
        source: std::io::Error,
    },
    /// The mapping succeeded, but not directly behind the heap.
    #[error("mapped at 0x{actual:x} instead of 0x{expected:x}")]
    Misplaced {
        /// Address the heap needed
        expected: usize,
        /// Address the kernel chose
        actual: usize,
    },
    /// The hugepages could not be reserved for the process.
    #[error("failed to reserve huge pages: {0}")]
    Commit(#[source] std::io::Error),
    /// The request does not fit into the address space.
    #[error("heap size overflow")]
    Overflow,
    /// The request would move the heap top below the heap base.
    #[error("cannot shrink {by} bytes below the heap base")]
    Underflow {
        /// Bytes missing below the base
        by: usize,
    },
}

/// Hugepage-backed heap growth hook.
///
/// Owns the [`HeapState`] and the [`RegionMapper`] holding the backing
/// descriptor. All mutation goes through [`grow`](MemoryRegionProvider::grow).
#[derive(Debug)]
pub struct Morecore<M> {
    state: HeapState,
    mapper: M,
    shrink: bool,
}

impl<M: RegionMapper> Morecore<M> {
    /// Creates a hook for an empty heap that will grow from `state.heapbase`.
    pub fn new(state: HeapState, mapper: M) -> Self {
        assert!(state.is_empty(), "heap must start without backing");
        Morecore {
            state,
            mapper,
            shrink: false,
        }
    }

    /// Enables releasing backing blocks that end up entirely above the heap
    /// top after a shrink request.
    pub fn with_shrink(mut self, shrink: bool) -> Self {
        self.shrink = shrink;
        self
    }

    /// Returns the mapper backing this heap.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Maps at least `required` more bytes directly behind the current backing.
    ///
    /// Leaves the state untouched unless everything succeeded.
    fn extend(&mut self, required: usize) -> Result<(), GrowError> {
        let newsize = align_up(required, self.state.blocksize).ok_or(GrowError::Overflow)?;
        let hint = self.state.map_end();
        debug!("Attempting to map {} bytes", newsize);

        let p = self
            .mapper
            .map(hint, newsize, self.state.mapsize)
            .map_err(|source| {
                warn!("Mapping failed in morecore: {}", source);
                GrowError::Map {
                    hint,
                    len: newsize,
                    source,
                }
            })?;

        if !self.state.is_anchored() {
            if self.state.heapbase != 0 && self.state.heapbase != p {
                warn!(
                    "Heap originates at 0x{:x} instead of 0x{:x}",
                    p, self.state.heapbase
                );
            }
        } else if p != hint {
            self.release(p, newsize);
            warn!(
                "Mapped at 0x{:x} instead of 0x{:x} in morecore",
                p, hint
            );
            return Err(GrowError::Misplaced {
                expected: hint,
                actual: p,
            });
        }

        // guarantee these pages to the process
        if let Err(e) = self.mapper.commit(p, newsize) {
            warn!("Failed to reserve huge pages in morecore: {}", e);
            self.release(p, newsize);
            return Err(GrowError::Commit(e));
        }

        if !self.state.is_anchored() {
            self.state.anchor(p);
        }
        self.state.mapsize += newsize;
        Ok(())
    }

    /// Drops backing blocks above the heap top.
    fn trim(&mut self) {
        let Some(keep) = align_up(self.state.used(), self.state.blocksize) else {
            return;
        };
        if keep >= self.state.mapsize {
            return;
        }
        let start = self.state.heapbase + keep;
        let len = self.state.mapsize - keep;
        debug!("Releasing {} bytes at 0x{:x}", len, start);
        // everything above heaptop has been handed back by the host
        match unsafe { self.mapper.unmap(start, len) } {
            Ok(()) => self.state.mapsize = keep,
            Err(e) => warn!("Failed to release 0x{:x}+{} in morecore: {}", start, len, e),
        }
    }

    fn release(&mut self, addr: usize, len: usize) {
        // the mapping never became part of the heap
        if let Err(e) = unsafe { self.mapper.unmap(addr, len) } {
            warn!("munmap(0x{:x}, {}) failed: {}", addr, len, e);
        }
    }
}

impl<M: RegionMapper> MemoryRegionProvider for Morecore<M> {
    fn granularity(&self) -> Size {
        Size::from_bytes(self.state.blocksize)
    }

    fn grow(&mut self, increment: isize) -> Result<usize, GrowError> {
        debug!("morecore({}) = ...", increment);
        debug!(
            "heapbase = 0x{:x}, heaptop = 0x{:x}, mapsize = 0x{:x}",
            self.state.heapbase, self.state.heaptop, self.state.mapsize
        );

        let used = self.state.used();
        let new_used = used
            .checked_add_signed(increment)
            .ok_or_else(|| {
                if increment < 0 {
                    GrowError::Underflow {
                        by: increment.unsigned_abs() - used,
                    }
                } else {
                    GrowError::Overflow
                }
            })?;
        if self.state.heapbase.checked_add(new_used).is_none() {
            return Err(GrowError::Overflow);
        }

        if new_used > self.state.mapsize {
            self.extend(new_used - self.state.mapsize)?;
        }

        let p = self.state.heaptop;
        self.state.heaptop = self.state.heapbase + new_used;
        if self.shrink && increment < 0 {
            self.trim();
        }
        debug_assert!(self.state.is_consistent(), "{:?}", self.state);

        debug!("... = 0x{:x}", p);
        Ok(p)
    }

    fn state(&self) -> HeapState {
        self.state
    }
}
