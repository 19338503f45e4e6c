use serde::Serialize;

/// Bookkeeping for the hugepage-backed heap.
///
/// `[heapbase, heapbase + mapsize)` is backed by one contiguous run of
/// mappings; `heaptop` is the end of the memory handed out to the host
/// allocator and always lies inside that run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HeapState {
    /// Start of the heap. Fixed once the first mapping succeeds.
    pub heapbase: usize,
    /// Logical end of allocator-visible memory.
    pub heaptop: usize,
    /// Bytes backed by mappings starting at `heapbase`.
    pub mapsize: usize,
    /// Mapping granularity (one hugepage).
    pub blocksize: usize,
    anchored: bool,
}

impl HeapState {
    /// Creates an empty heap that will try to originate at `base`.
    ///
    /// A `base` of zero lets the kernel pick the address of the first mapping.
    pub fn new(base: usize, blocksize: usize) -> Self {
        assert!(blocksize > 0, "blocksize must be non-zero");
        HeapState {
            heapbase: base,
            heaptop: base,
            mapsize: 0,
            blocksize,
            anchored: false,
        }
    }

    /// Bytes handed out to the host allocator.
    pub fn used(&self) -> usize {
        self.heaptop - self.heapbase
    }

    /// Address right behind the last mapped byte.
    pub fn map_end(&self) -> usize {
        self.heapbase + self.mapsize
    }

    /// Whether `heapbase` has been pinned down by a successful mapping.
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Whether no backing is mapped at the moment.
    pub fn is_empty(&self) -> bool {
        self.mapsize == 0
    }

    pub(crate) fn anchor(&mut self, base: usize) {
        self.heapbase = base;
        self.heaptop = base;
        self.anchored = true;
    }

    /// Checks the structural invariants. Used by debug assertions and tests.
    pub fn is_consistent(&self) -> bool {
        self.heapbase <= self.heaptop
            && self.heaptop <= self.map_end()
            && self.mapsize % self.blocksize == 0
    }
}
