//! Utility functions and types used throughout hugeheap.
//!
//! - [`Size`] - Memory size representation
//! - Constants for page sizes and configuration keys ([`PAGE_SIZE`], [`ENV_MORECORE`], ...)
//! - [`align_up`] for rounding to a mapping granularity

mod constants;
mod size;

pub use self::constants::*;
pub use self::size::Size;

/// Rounds `value` up to the next multiple of `align`.
///
/// `align` does not have to be a power of two; hugepage sizes always are, but
/// virtual address granularities reported by some platforms are not.
/// Returns `None` on overflow.
///
/// # Examples
///
/// ```
/// use hugeheap_core::util::align_up;
///
/// assert_eq!(align_up(3_000_000, 2 << 20), Some(4 << 20));
/// assert_eq!(align_up(4 << 20, 2 << 20), Some(4 << 20));
/// assert_eq!(align_up(0, 2 << 20), Some(0));
/// ```
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    assert!(align > 0, "alignment must be non-zero");
    let rem = value % align;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(align - rem)
    }
}
