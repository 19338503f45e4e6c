//! Introspection of the current process's memory mappings.

use pagemap2::PageMapError;
use thiserror::Error;

/// Errors that can happen while reading `/proc/self/maps`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct MapsError(#[from] PageMapError);

/// Returns the `[start, end)` ranges of all mappings of this process that
/// overlap `[addr, addr + len)`.
///
/// # Errors
///
/// Returns an error if the process maps cannot be read.
pub fn overlapping(addr: usize, len: usize) -> Result<Vec<(usize, usize)>, MapsError> {
    let mut pagemap = pagemap2::PageMap::new(std::process::id() as u64)?;
    let end = addr.saturating_add(len) as u64;
    let addr = addr as u64;
    Ok(pagemap
        .maps()?
        .iter()
        .map(|map| map.vma())
        // last_address() is inclusive
        .map(|vma| (vma.start_address(), vma.last_address().saturating_add(1)))
        .filter(|(start, vma_end)| *start < end && addr < *vma_end)
        .map(|(start, vma_end)| (start as usize, vma_end as usize))
        .collect())
}

/// Whether any mapping of this process overlaps `[addr, addr + len)`.
///
/// # Errors
///
/// Returns an error if the process maps cannot be read.
pub fn is_mapped(addr: usize, len: usize) -> Result<bool, MapsError> {
    Ok(!overlapping(addr, len)?.is_empty())
}
