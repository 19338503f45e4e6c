//! One-time wiring of the growth hook into a host allocator.

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::HeapState;
use crate::config::{ConfigError, MorecoreConfig};
use crate::host::{HostAllocator, Tunable};
use crate::mapper::RegionMapper;
use crate::morecore::Morecore;
use crate::util::{Size, align_up};

/// The system facilities the growth hook is built from.
///
/// Implemented for real hugetlbfs in the `hugeheap-hugetlbfs` crate.
pub trait Platform {
    /// Mapper over the backing descriptor.
    type Mapper: RegionMapper + Send + 'static;

    /// Returns the hugepage size, or `None` if hugepages are unavailable.
    fn hugepage_size(&self) -> Option<Size>;

    /// Opens an unlinked, hugepage-backed object and wraps it in a mapper.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if no such object can be created.
    fn backing_mapper(&self) -> std::io::Result<Self::Mapper>;

    /// Returns the alignment hugepage mappings must have in the address space.
    fn vaddr_granularity(&self) -> usize;

    /// Returns the current program break.
    fn program_break(&self) -> usize;
}

/// Errors that abort the setup. The host allocator keeps its default behavior.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The platform reports no hugepage size.
    #[error("Hugepages unavailable")]
    HugepagesUnavailable,
    /// No hugepage-backed object could be opened.
    #[error("Couldn't open hugetlbfs file for morecore: {0}")]
    Backing(#[source] std::io::Error),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The default heap base does not fit into the address space.
    #[error("Program break 0x{0:x} cannot be aligned")]
    BaseOverflow(usize),
    /// The host allocator refused the hook.
    #[error("Host allocator rejected the growth hook: {0}")]
    Host(String),
}

/// Result of a successful setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Activation {
    /// Hugepage heap growth was not requested.
    NotRequested,
    /// The hook is installed.
    Active {
        /// Address the heap will try to originate at (0 = kernel's choice)
        heapbase: usize,
        /// Mapping granularity
        blocksize: Size,
    },
}

/// Installs a hugepage-backed growth hook into `host`.
///
/// Does nothing unless `config` enables it. Any failure is logged and leaves
/// `host` exactly as it was, except for tuning failures, which are only
/// logged once the hook is in place.
///
/// # Errors
///
/// See [`SetupError`].
pub fn setup_morecore<P: Platform, H: HostAllocator>(
    config: &MorecoreConfig,
    platform: &P,
    host: &mut H,
) -> Result<Activation, SetupError> {
    if !config.enabled {
        return Ok(Activation::NotRequested);
    }

    let blocksize = match platform.hugepage_size() {
        Some(size) if size.bytes() > 0 => size,
        _ => {
            error!("Hugepages unavailable");
            return Err(SetupError::HugepagesUnavailable);
        }
    };

    let mapper = platform.backing_mapper().map_err(|e| {
        error!("Couldn't open hugetlbfs file for morecore: {}", e);
        SetupError::Backing(e)
    })?;

    let heapaddr = match config.heapbase() {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            let brk = platform.program_break();
            align_up(brk, platform.vaddr_granularity().max(1))
                .ok_or(SetupError::BaseOverflow(brk))?
        }
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    debug!("setup_morecore(): heapaddr = 0x{:x}", heapaddr);

    let hook = Morecore::new(HeapState::new(heapaddr, blocksize.bytes()), mapper)
        .with_shrink(config.shrink);
    host.install_growth_hook(Box::new(hook)).map_err(|e| {
        error!("Host allocator rejected the growth hook: {}", e);
        SetupError::Host(e.to_string())
    })?;

    // make the host prefer our heap over direct mappings
    let half = blocksize.bytes() / 2;
    for (tunable, value) in [
        (Tunable::TrimThreshold, half),
        (Tunable::TopPad, half),
        (Tunable::MmapMax, 0),
    ] {
        if let Err(e) = host.set_tunable(tunable, value) {
            warn!("Failed to set {:?} to {}: {}", tunable, value, e);
        }
    }

    info!(
        "Growing heap on {} hugepages from 0x{:x}",
        blocksize, heapaddr
    );
    Ok(Activation::Active {
        heapbase: heapaddr,
        blocksize,
    })
}
