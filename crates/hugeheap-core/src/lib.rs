//! # Hugeheap Core
//!
//! `hugeheap-core` grows a process heap on hugepage-backed mappings while
//! keeping the classic `sbrk` contract: one contiguous region that is extended
//! at its end, with the previous end returned to the caller.
//!
//! ## Architecture Overview
//!
//! - [`provider::MemoryRegionProvider`] - The capability a host allocator consumes
//!   to enlarge its heap.
//!
//! - [`host::HostAllocator`] - The extension point of a host allocator: growth hook
//!   registration and tuning knobs.
//!
//! - [`setup::Platform`] - The system facilities the hook is built from (hugepage
//!   size, backing descriptor, address-space layout).
//!
//! ## Main Components
//!
//! - [`Morecore`] - The growth hook. Maps hugepage-sized blocks of an unlinked
//!   hugetlbfs file directly behind each other and fails instead of handing out
//!   non-contiguous memory.
//!
//! - [`setup_morecore`] - Reads the [`MorecoreConfig`], builds the hook and installs
//!   it into a host allocator.
//!
//! - [`mapper::FdMapper`] - `mmap(2)`-based [`mapper::RegionMapper`].
//!
//! ## Platform Support
//!
//! Linux only. Hugepages must be reserved in the pool
//! (`/proc/sys/vm/nr_hugepages`) before the heap can grow on them.

#![warn(missing_docs)]

pub mod config;
mod heap_state;
pub mod host;
pub mod mapper;
pub mod maps;
mod morecore;
pub mod provider;
pub mod setup;
#[cfg(test)]
mod test_util;
pub mod util;

pub use crate::config::MorecoreConfig;
pub use crate::heap_state::HeapState;
pub use crate::morecore::{GrowError, Morecore};
pub use crate::setup::{Activation, SetupError, setup_morecore};
