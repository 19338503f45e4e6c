use std::cell::UnsafeCell;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicU8, Ordering};

use hugeheap_core::provider::MemoryRegionProvider;

use crate::Error;

type Hook = Box<dyn MemoryRegionProvider + Send>;

const EMPTY: u8 = 0;
const CLAIMED: u8 = 1;
const READY: u8 = 2;

/// Process-lifetime home of the growth hook called by glibc.
///
/// The hook is written once by [`install`](HookSlot::install) and afterwards
/// only touched from [`grow`](HookSlot::grow), which glibc calls with its
/// arena lock held. `state` goes `EMPTY -> CLAIMED -> READY`; the hook is
/// only read once `READY` is observed.
pub(crate) struct HookSlot {
    state: AtomicU8,
    hook: UnsafeCell<Option<Hook>>,
}

// SAFETY: see the type documentation; all access is serialized by glibc.
unsafe impl Sync for HookSlot {}

impl HookSlot {
    pub(crate) const fn new() -> Self {
        HookSlot {
            state: AtomicU8::new(EMPTY),
            hook: UnsafeCell::new(None),
        }
    }

    pub(crate) fn install(&self, hook: Hook) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(EMPTY, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(Error::AlreadyInstalled);
        }
        // SAFETY: the claim admits exactly one writer and readers wait for READY
        unsafe { *self.hook.get() = Some(hook) };
        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Grows the heap, returning null when no memory is available.
    ///
    /// # Safety
    ///
    /// Calls must not overlap.
    pub(crate) unsafe fn grow(&self, increment: isize) -> *mut libc::c_void {
        if self.state.load(Ordering::Acquire) != READY {
            return null_mut();
        }
        let hook = unsafe { &mut *self.hook.get() };
        match hook.as_mut().map(|h| h.grow(increment)) {
            Some(Ok(p)) => p as *mut libc::c_void,
            _ => null_mut(),
        }
    }
}
