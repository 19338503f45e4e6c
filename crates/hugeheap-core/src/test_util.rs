//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::os::fd::{FromRawFd, OwnedFd};

use crate::mapper::RegionMapper;

/// Creates a small-page memory file of `len` bytes.
pub(crate) fn memfd(len: usize) -> OwnedFd {
    let fd = unsafe { libc::memfd_create(c"hugeheap-test".as_ptr(), libc::MFD_CLOEXEC) };
    assert!(fd >= 0, "memfd_create: {}", std::io::Error::last_os_error());
    assert_eq!(unsafe { libc::ftruncate(fd, len as libc::off_t) }, 0);
    unsafe { OwnedFd::from_raw_fd(fd) }
}

/// Simulated address space with fault injection.
///
/// Honors hints unless the hinted range overlaps an existing mapping, in which
/// case the mapping is placed right after the highest existing one, like the
/// kernel does for a non-fixed hint.
#[derive(Debug, Default)]
pub(crate) struct FakeMapper {
    /// start -> (len, file offset)
    pub mappings: BTreeMap<usize, (usize, usize)>,
    /// Total bytes the fake backing may hand out.
    pub capacity: Option<usize>,
    pub fail_commit: bool,
    pub fail_unmap: bool,
    pub maps: usize,
    pub unmaps: usize,
    pub commits: usize,
}

pub(crate) const FAKE_DEFAULT_BASE: usize = 0x7f00_0000_0000;

impl FakeMapper {
    pub(crate) fn occupy(&mut self, addr: usize, len: usize) {
        self.mappings.insert(addr, (len, usize::MAX));
    }

    fn overlaps(&self, addr: usize, len: usize) -> bool {
        self.mappings
            .iter()
            .any(|(&start, &(l, _))| start < addr + len && addr < start + l)
    }

    fn backed(&self) -> usize {
        self.mappings
            .values()
            .filter(|(_, off)| *off != usize::MAX)
            .map(|(l, _)| l)
            .sum()
    }

    pub(crate) fn is_mapped(&self, addr: usize, len: usize) -> bool {
        self.overlaps(addr, len)
    }
}

impl RegionMapper for FakeMapper {
    fn map(&mut self, hint: usize, len: usize, offset: usize) -> std::io::Result<usize> {
        if let Some(capacity) = self.capacity
            && self.backed() + len > capacity
        {
            return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let addr = if hint != 0 && !self.overlaps(hint, len) {
            hint
        } else {
            self.mappings
                .iter()
                .next_back()
                .map_or(FAKE_DEFAULT_BASE, |(&start, &(l, _))| {
                    (start + l).max(FAKE_DEFAULT_BASE)
                })
        };
        self.mappings.insert(addr, (len, offset));
        self.maps += 1;
        Ok(addr)
    }

    unsafe fn unmap(&mut self, addr: usize, len: usize) -> std::io::Result<()> {
        if self.fail_unmap {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.unmaps += 1;
        // split or drop every mapping touching the range
        let touched: Vec<(usize, (usize, usize))> = self
            .mappings
            .range(..addr + len)
            .filter(|(start, (l, _))| **start + *l > addr)
            .map(|(&s, &v)| (s, v))
            .collect();
        for (start, (l, off)) in touched {
            self.mappings.remove(&start);
            if start < addr {
                self.mappings.insert(start, (addr - start, off));
            }
            if start + l > addr + len {
                let tail = addr + len;
                let tail_off = if off == usize::MAX {
                    off
                } else {
                    off + (tail - start)
                };
                self.mappings.insert(tail, (start + l - tail, tail_off));
            }
        }
        Ok(())
    }

    fn commit(&mut self, _addr: usize, _len: usize) -> std::io::Result<()> {
        if self.fail_commit {
            return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.commits += 1;
        Ok(())
    }
}
