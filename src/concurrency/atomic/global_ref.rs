use core::sync::atomic::{AtomicU64, Ordering};

use crate::naming::GlobalRef;

/// An atomic slot holding a [`GlobalRef`].
///
/// Starts out as [`GlobalRef::INVALID`] unless constructed otherwise.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicGlobalRef {
    inner: AtomicU64,
}

impl AtomicGlobalRef {
    /// Creates a new slot holding `value`.
    #[inline(always)]
    pub const fn new(value: GlobalRef) -> Self {
        Self {
            inner: AtomicU64::new(value.into_raw()),
        }
    }

    /// Creates an unset slot.
    #[inline(always)]
    pub const fn invalid() -> Self {
        Self::new(GlobalRef::INVALID)
    }

    /// Loads the current reference.
    #[inline(always)]
    pub fn load(&self, order: Ordering) -> GlobalRef {
        GlobalRef::from_raw(self.inner.load(order))
    }

    /// Stores a new reference.
    #[inline(always)]
    pub fn store(&self, value: GlobalRef, order: Ordering) {
        self.inner.store(value.into_raw(), order);
    }

    /// Swaps the current reference, returning the previous one.
    #[inline(always)]
    pub fn swap(&self, value: GlobalRef, order: Ordering) -> GlobalRef {
        GlobalRef::from_raw(self.inner.swap(value.into_raw(), order))
    }

    /// Resets the slot to [`GlobalRef::INVALID`], returning what it held.
    #[inline(always)]
    pub fn take(&self, order: Ordering) -> GlobalRef {
        self.swap(GlobalRef::INVALID, order)
    }

    /// Returns `true` if the slot currently holds a valid reference.
    #[inline(always)]
    pub fn is_set(&self, order: Ordering) -> bool {
        self.load(order).is_valid()
    }
}

impl core::fmt::Debug for AtomicGlobalRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_to_invalid() {
        let slot = AtomicGlobalRef::new(GlobalRef::from_raw(3));
        assert!(slot.is_set(Ordering::Relaxed));
        assert_eq!(slot.take(Ordering::AcqRel), GlobalRef::from_raw(3));
        assert!(!slot.is_set(Ordering::Relaxed));
    }
}
