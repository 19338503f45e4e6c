//! Mapping interface driven by the growth hook.

use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::null_mut;

use log::warn;

/// Places, releases and commits mappings of a backing object.
///
/// The interface does not promise contiguity: [`map`](RegionMapper::map)
/// only takes a hint and reports where the kernel actually put the mapping.
/// [`Morecore`](crate::Morecore) is responsible for checking placement.
pub trait RegionMapper {
    /// Maps `len` bytes of the backing object, starting at file `offset`,
    /// read/write and private, preferably at `hint`.
    ///
    /// A `hint` of zero leaves the choice of address to the kernel.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping could not be created, which
    /// typically means the hugepage pool is exhausted.
    fn map(&mut self, hint: usize, len: usize, offset: usize) -> std::io::Result<usize>;

    /// Releases a mapping previously returned by [`map`](RegionMapper::map).
    ///
    /// # Safety
    ///
    /// `[addr, addr + len)` must not be referenced by anybody anymore.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the range could not be unmapped.
    unsafe fn unmap(&mut self, addr: usize, len: usize) -> std::io::Result<()>;

    /// Forces the kernel to back `[addr, addr + len)` with physical pages now.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pages could not be faulted in.
    fn commit(&mut self, addr: usize, len: usize) -> std::io::Result<()>;
}

/// [`RegionMapper`] over a file descriptor, using `mmap(2)`.
#[derive(Debug)]
pub struct FdMapper {
    fd: OwnedFd,
}

impl FdMapper {
    /// Creates a mapper that owns the backing descriptor `fd`.
    pub fn new(fd: OwnedFd) -> Self {
        FdMapper { fd }
    }
}

impl AsRawFd for FdMapper {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}

impl RegionMapper for FdMapper {
    fn map(&mut self, hint: usize, len: usize, offset: usize) -> std::io::Result<usize> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        let hint = if hint == 0 {
            null_mut()
        } else {
            hint as *mut libc::c_void
        };
        let p = unsafe {
            libc::mmap(
                hint,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE,
                self.fd.as_raw_fd(),
                offset,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(p as usize)
    }

    unsafe fn unmap(&mut self, addr: usize, len: usize) -> std::io::Result<()> {
        if unsafe { libc::munmap(addr as *mut libc::c_void, len) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn commit(&mut self, addr: usize, len: usize) -> std::io::Result<()> {
        let p = addr as *const libc::c_void;
        if unsafe { libc::mlock(p, len) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // only the faulting matters, the lock is not kept
        if unsafe { libc::munlock(p, len) } != 0 {
            warn!(
                "munlock(0x{:x}, {}): {}",
                addr,
                len,
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }
}
