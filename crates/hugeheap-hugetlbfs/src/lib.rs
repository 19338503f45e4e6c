//! Hugetlbfs platform for hugeheap.
//!
//! This crate provides the system side of the hugepage heap: the default
//! hugepage size, the hugepage pool counters, and unlinked hugetlbfs files
//! from which the heap is mapped.
//!
//! Implements the [`hugeheap_core::setup::Platform`] trait.
//!
//! # Platform Requirements
//!
//! - Linux with hugetlbfs support
//! - Hugepages must be reserved before the heap can grow on them

#![warn(missing_docs)]

mod hugepage;
mod platform;
mod unlinked;

pub use hugepage::*;
pub use platform::*;
pub use unlinked::*;
