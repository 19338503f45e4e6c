use hugeheap_core::mapper::FdMapper;
use hugeheap_core::setup::Platform;
use hugeheap_core::util::Size;

use crate::{HUGEPAGE_SIZE, unlinked_fd};

/// Address-space slice size hugepage mappings are confined to on powerpc64.
#[cfg(target_arch = "powerpc64")]
const SLICE_SIZE: usize = 1 << 28;

/// Hugepages from the system's default hugetlbfs pool.
///
/// # Implementation
///
/// Implements [`hugeheap_core::setup::Platform`] with the default hugepage size
/// from `/proc/meminfo` and an unlinked file on a matching hugetlbfs mount.
///
/// # Platform Requirements
///
/// - Hugepages must be reserved via `/proc/sys/vm/nr_hugepages` or kernel boot parameters
/// - Either a hugetlbfs mount (usually `/dev/hugepages`) or `memfd_create` with
///   `MFD_HUGETLB` support (Linux 4.14+)
#[derive(Debug, Default, Copy, Clone)]
pub struct Hugetlbfs {}

impl Platform for Hugetlbfs {
    type Mapper = FdMapper;

    fn hugepage_size(&self) -> Option<Size> {
        *HUGEPAGE_SIZE
    }

    fn backing_mapper(&self) -> std::io::Result<FdMapper> {
        let size = HUGEPAGE_SIZE.ok_or(std::io::ErrorKind::Unsupported)?;
        unlinked_fd(size).map(FdMapper::new)
    }

    fn vaddr_granularity(&self) -> usize {
        vaddr_granularity(HUGEPAGE_SIZE.map_or(0, |s| s.bytes()))
    }

    fn program_break(&self) -> usize {
        unsafe { libc::sbrk(0) as usize }
    }
}

#[cfg(target_arch = "powerpc64")]
fn vaddr_granularity(_hugepage_size: usize) -> usize {
    SLICE_SIZE
}

#[cfg(not(target_arch = "powerpc64"))]
fn vaddr_granularity(hugepage_size: usize) -> usize {
    hugepage_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_break_is_mapped_data_end() {
        let brk = Hugetlbfs::default().program_break();
        assert_ne!(brk, 0);
        assert_ne!(brk, usize::MAX);
    }

    #[test]
    fn granularity_follows_hugepage_size() {
        let platform = Hugetlbfs::default();
        if let Some(size) = platform.hugepage_size() {
            assert_eq!(platform.vaddr_granularity() % size.bytes(), 0);
        }
    }
}
