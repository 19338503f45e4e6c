//! # Hugeheap
//!
//! Hugeheap moves a process heap onto hugepages. Instead of extending the
//! program break, the host allocator's growth hook maps blocks of an unlinked
//! hugetlbfs file directly behind each other, so the heap stays one
//! contiguous region and every access benefits from fewer TLB misses.
//!
//! ## Quickstart guide
//!
//! Reserve hugepages and run a program with the hook enabled:
//!
//! ```sh
//! echo 64 | sudo tee /proc/sys/vm/nr_hugepages
//! cargo build --release --features preload
//! HUGETLB_MORECORE=yes LD_PRELOAD=target/release/libhugeheap_glibc.so ./program
//! ```
//!
//! On C libraries without `__morecore` use the Rust global allocator host:
//!
//! ```no_run
//! use hugeheap::llheap::GrowableHeap;
//! use hugeheap::{Hugetlbfs, MorecoreConfig, setup_morecore};
//!
//! #[global_allocator]
//! static HEAP: GrowableHeap = GrowableHeap::new();
//!
//! fn main() {
//!     if let Err(e) = setup_morecore(&MorecoreConfig::from_env(), &Hugetlbfs::default(), &mut &HEAP) {
//!         eprintln!("heap stays on regular pages: {e}");
//!     }
//! }
//! ```
//!
//! ## Environment
//!
//! - `HUGETLB_MORECORE`: enables the hugepage heap when set.
//! - `HUGETLB_MORECORE_HEAPBASE`: hexadecimal address the heap should start at.
//!   Defaults to the program break rounded up to the hugepage boundary.
//! - `HUGETLB_MORECORE_SHRINK`: give hugepages back when the heap shrinks.
//!
//! ## Crates
//!
//! - `hugeheap-core`: growth hook, configuration and setup.
//! - `hugeheap-hugetlbfs`: hugepage size, pool counters and backing files.
//! - `hugeheap-glibc` (feature `glibc`): glibc `__morecore` host.
//! - `hugeheap-llheap` (feature `llheap`): Rust global allocator host.

pub use hugeheap_core::*;
pub use hugeheap_hugetlbfs::*;

#[cfg(feature = "glibc")]
pub use hugeheap_glibc as glibc;
#[cfg(feature = "llheap")]
pub use hugeheap_llheap as llheap;
