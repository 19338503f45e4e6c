use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use hugeheap_core::util::Size;
use log::{debug, warn};

const MOUNTS_PATH: &str = "/proc/mounts";

/// Parses a `pagesize=` mount option such as `2M`, `1G` or `2048K`.
fn parse_pagesize(s: &str) -> Option<usize> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value = digits.parse::<usize>().ok()?;
    let shift = match unit {
        "" => 0,
        "K" | "k" => 10,
        "M" | "m" => 20,
        "G" | "g" => 30,
        _ => return None,
    };
    value.checked_mul(1 << shift)
}

/// Finds a hugetlbfs mount point for pages of `size` in mounts-formatted text.
///
/// Mounts without a `pagesize=` option serve the default hugepage size, which
/// is what `size` is expected to be.
fn find_mount_in(mounts: &str, size: Size) -> Option<PathBuf> {
    let mut fallback = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_), Some(dir), Some("hugetlbfs"), Some(opts)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if opts.split(',').any(|o| o == "ro") {
            continue;
        }
        let pagesize = opts
            .split(',')
            .find_map(|o| o.strip_prefix("pagesize="))
            .map(parse_pagesize);
        match pagesize {
            Some(Some(p)) if p == size.bytes() => return Some(PathBuf::from(dir)),
            None if fallback.is_none() => fallback = Some(PathBuf::from(dir)),
            _ => {}
        }
    }
    fallback
}

/// Finds a writable hugetlbfs mount point for pages of `size`.
///
/// # Errors
///
/// Returns an I/O error if `/proc/mounts` cannot be read.
pub fn find_mount(size: Size) -> std::io::Result<Option<PathBuf>> {
    let mut mounts = String::new();
    File::open(MOUNTS_PATH)?.read_to_string(&mut mounts)?;
    Ok(find_mount_in(&mounts, size))
}

/// Creates a file in `dir` and unlinks it right away.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or removed.
pub fn unlinked_in(dir: &Path) -> std::io::Result<OwnedFd> {
    let template = CString::new(
        dir.join("hugeheap.tmp.XXXXXX")
            .into_os_string()
            .into_vec(),
    )?;
    let mut path = template.into_bytes_with_nul();
    let fd = unsafe { libc::mkstemp(path.as_mut_ptr() as *mut libc::c_char) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    if unsafe { libc::unlink(path.as_ptr() as *const libc::c_char) } != 0 {
        let err = std::io::Error::last_os_error();
        warn!(
            "Couldn't unlink {}: {}",
            String::from_utf8_lossy(&path[..path.len() - 1]),
            err
        );
        return Err(err);
    }
    Ok(fd)
}

/// Creates an anonymous hugetlbfs-backed memory file of the default hugepage size.
///
/// # Errors
///
/// Returns an I/O error if the kernel lacks `MFD_HUGETLB` support.
pub fn memfd_hugetlb() -> std::io::Result<OwnedFd> {
    let fd = unsafe {
        libc::memfd_create(c"hugeheap".as_ptr(), libc::MFD_CLOEXEC | libc::MFD_HUGETLB)
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Opens an unlinked hugepage-backed file for pages of `size`.
///
/// Prefers a file on a mounted hugetlbfs and falls back to an anonymous
/// hugetlb memory file when no suitable mount exists.
///
/// # Errors
///
/// Returns an I/O error if neither works.
pub fn unlinked_fd(size: Size) -> std::io::Result<OwnedFd> {
    match find_mount(size) {
        Ok(Some(dir)) => {
            debug!("Using hugetlbfs mount {}", dir.display());
            return unlinked_in(&dir);
        }
        Ok(None) => debug!("No hugetlbfs mount for {} pages", size),
        Err(e) => warn!("Couldn't read {}: {}", MOUNTS_PATH, e),
    }
    memfd_hugetlb()
}
