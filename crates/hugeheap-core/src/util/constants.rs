/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Enables hugepage-backed heap growth when present.
pub const ENV_MORECORE: &str = "HUGETLB_MORECORE";
/// Explicit heap base address, hexadecimal.
pub const ENV_MORECORE_HEAPBASE: &str = "HUGETLB_MORECORE_HEAPBASE";
/// Enables releasing backing blocks when the heap shrinks.
pub const ENV_MORECORE_SHRINK: &str = "HUGETLB_MORECORE_SHRINK";
