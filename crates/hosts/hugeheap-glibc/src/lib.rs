//! glibc malloc host for hugeheap.
//!
//! Installs the hugepage growth hook as glibc's `__morecore` and tunes malloc
//! with `mallopt` so it grows the main arena through the hook instead of
//! falling back to `mmap` for large requests.
//!
//! `__morecore` was removed in glibc 2.34. It is looked up at runtime, so on
//! newer systems [`setup_from_env`] fails with a diagnostic and malloc keeps
//! its default behavior.
//!
//! With the `preload` feature the setup runs from `.init_array` when the
//! library is loaded, so `HUGETLB_MORECORE=yes LD_PRELOAD=libhugeheap_glibc.so`
//! moves an unmodified program's heap onto hugepages.

#![warn(missing_docs)]

mod slot;

use hugeheap_core::host::{HostAllocator, Tunable};
use hugeheap_core::provider::MemoryRegionProvider;
use hugeheap_core::{Activation, MorecoreConfig, SetupError, setup_morecore};
use hugeheap_hugetlbfs::Hugetlbfs;
use libc::c_int;
use log::error;
use thiserror::Error;

use crate::slot::HookSlot;

// <malloc.h>
const M_TRIM_THRESHOLD: c_int = -1;
const M_TOP_PAD: c_int = -2;
const M_MMAP_MAX: c_int = -4;

unsafe extern "C" {
    fn mallopt(param: c_int, value: c_int) -> c_int;
}

type MorecoreFn = unsafe extern "C" fn(isize) -> *mut libc::c_void;

static MORECORE: HookSlot = HookSlot::new();

unsafe extern "C" fn hugetlbfs_morecore(increment: isize) -> *mut libc::c_void {
    // SAFETY: glibc only calls __morecore with the main arena locked
    unsafe { MORECORE.grow(increment) }
}

/// Errors reported by the glibc host.
#[derive(Debug, Error)]
pub enum Error {
    /// The C library does not export `__morecore`.
    #[error("__morecore is not available in this C library")]
    NoMorecore,
    /// A growth hook has already been installed in this process.
    #[error("A growth hook is already installed")]
    AlreadyInstalled,
    /// The value does not fit into a `mallopt` argument.
    #[error("{1} is out of range for {0:?}")]
    OutOfRange(Tunable, usize),
    /// `mallopt` rejected the value.
    #[error("mallopt rejected {0:?} = {1}")]
    Rejected(Tunable, usize),
}

fn mallopt_param(tunable: Tunable) -> c_int {
    match tunable {
        Tunable::TrimThreshold => M_TRIM_THRESHOLD,
        Tunable::TopPad => M_TOP_PAD,
        Tunable::MmapMax => M_MMAP_MAX,
    }
}

/// The glibc allocator of this process.
#[derive(Debug)]
pub struct GlibcMalloc {
    morecore: *mut Option<MorecoreFn>,
}

impl GlibcMalloc {
    /// Looks up glibc's `__morecore` hook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMorecore`] if the symbol does not exist.
    pub fn locate() -> Result<Self, Error> {
        let sym = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"__morecore".as_ptr()) };
        if sym.is_null() {
            return Err(Error::NoMorecore);
        }
        Ok(GlibcMalloc {
            morecore: sym as *mut Option<MorecoreFn>,
        })
    }
}

impl HostAllocator for GlibcMalloc {
    type Error = Error;

    fn install_growth_hook(
        &mut self,
        hook: Box<dyn MemoryRegionProvider + Send>,
    ) -> Result<(), Error> {
        MORECORE.install(hook)?;
        unsafe { *self.morecore = Some(hugetlbfs_morecore) };
        Ok(())
    }

    fn set_tunable(&mut self, tunable: Tunable, value: usize) -> Result<(), Error> {
        let v = c_int::try_from(value).map_err(|_| Error::OutOfRange(tunable, value))?;
        // mallopt returns 1 on success
        if unsafe { mallopt(mallopt_param(tunable), v) } != 1 {
            return Err(Error::Rejected(tunable, value));
        }
        Ok(())
    }
}

/// Moves the glibc heap onto hugepages if `HUGETLB_MORECORE` is set.
///
/// # Errors
///
/// Returns an error if setup fails; malloc then keeps its default behavior.
pub fn setup_from_env() -> Result<Activation, SetupError> {
    let config = MorecoreConfig::from_env();
    if !config.enabled {
        return Ok(Activation::NotRequested);
    }
    let mut host = GlibcMalloc::locate().map_err(|e| {
        error!("{}", e);
        SetupError::Host(e.to_string())
    })?;
    setup_morecore(&config, &Hugetlbfs::default(), &mut host)
}

#[cfg(feature = "preload")]
#[used]
#[unsafe(link_section = ".init_array")]
static SETUP_MORECORE: extern "C" fn() = {
    extern "C" fn setup_morecore_at_load() {
        // failures are logged by the setup itself
        let _ = setup_from_env();
    }
    setup_morecore_at_load
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunables_map_to_mallopt_params() {
        assert_eq!(mallopt_param(Tunable::TrimThreshold), -1);
        assert_eq!(mallopt_param(Tunable::TopPad), -2);
        assert_eq!(mallopt_param(Tunable::MmapMax), -4);
    }

    #[test]
    fn mallopt_accepts_top_pad() -> anyhow::Result<()> {
        // the glibc default
        let mut host = GlibcMalloc {
            morecore: std::ptr::null_mut(),
        };
        host.set_tunable(Tunable::TopPad, 128 * 1024)?;
        Ok(())
    }

    #[test]
    fn oversized_tunable_is_rejected() {
        let mut host = GlibcMalloc {
            morecore: std::ptr::null_mut(),
        };
        assert!(matches!(
            host.set_tunable(Tunable::TrimThreshold, usize::MAX),
            Err(Error::OutOfRange(Tunable::TrimThreshold, _))
        ));
    }

    #[test]
    fn not_requested_without_env() {
        if std::env::var_os("HUGETLB_MORECORE").is_none() {
            assert!(matches!(setup_from_env(), Ok(Activation::NotRequested)));
        }
    }
}
