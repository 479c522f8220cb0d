//! Global references and the locality-wide naming registry.
//!
//! A [`GlobalRef`] is an opaque, copyable handle. It never owns what it names:
//! whoever called `alloc` for a buffer is responsible for the matching `free`.

pub mod registry;

pub use registry::Registry;

use core::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, location-independent handle to a buffer or component.
///
/// The raw value `0` is reserved for [`GlobalRef::INVALID`], the "unset" sentinel.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalRef(u64);

impl GlobalRef {
    /// The reserved "unset" reference.
    pub const INVALID: GlobalRef = GlobalRef(0);

    /// Wraps a raw identifier.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[inline]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// Returns `true` unless this is [`GlobalRef::INVALID`].
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "GlobalRef({:#x})", self.0)
        } else {
            f.write_str("GlobalRef(invalid)")
        }
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#x}", self.0)
        } else {
            f.write_str("<invalid>")
        }
    }
}
