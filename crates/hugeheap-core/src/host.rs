//! The extension point of an external allocator.

use crate::provider::MemoryRegionProvider;

/// Allocator tuning knobs adjusted when the growth hook is installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Tunable {
    /// Free space at the top of the heap above which the allocator trims.
    TrimThreshold,
    /// Extra bytes requested on every growth.
    TopPad,
    /// Maximum number of requests the allocator may serve with direct
    /// mappings instead of growing the heap. Zero forces all growth through
    /// the hook.
    MmapMax,
}

/// An allocator that can obtain its heap from a [`MemoryRegionProvider`].
///
/// # Associated Types
///
/// * `Error` - The error type returned when the allocator rejects a hook or
///   a tuning value. Must implement [`std::error::Error`].
pub trait HostAllocator {
    /// The error type returned by host operations.
    type Error: std::error::Error;

    /// Replaces the allocator's default heap growth with `hook`.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator offers no such extension point or a
    /// hook is already installed.
    fn install_growth_hook(
        &mut self,
        hook: Box<dyn MemoryRegionProvider + Send>,
    ) -> Result<(), Self::Error>;

    /// Sets one of the allocator's tuning knobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator rejects the value.
    fn set_tunable(&mut self, tunable: Tunable, value: usize) -> Result<(), Self::Error>;
}

impl<H: HostAllocator + ?Sized> HostAllocator for &mut H {
    type Error = H::Error;

    fn install_growth_hook(
        &mut self,
        hook: Box<dyn MemoryRegionProvider + Send>,
    ) -> Result<(), Self::Error> {
        (**self).install_growth_hook(hook)
    }

    fn set_tunable(&mut self, tunable: Tunable, value: usize) -> Result<(), Self::Error> {
        (**self).set_tunable(tunable, value)
    }
}
