//! Native object handles and registration generations.

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque address identifying one native instance.
///
/// Handles are never null. Two handles compare equal when they carry the
/// same address, which says nothing about whether they name the same
/// *object*: an allocator may hand the address out again after the first
/// object is destroyed. The identity registry pairs each registration with a
/// [`Generation`] to tell the two apart.
///
/// # Example
///
/// ```
/// use objbridge_core::NativeHandle;
///
/// let handle = NativeHandle::from_addr(0x1000).unwrap();
/// assert_eq!(handle.addr(), 0x1000);
/// assert!(NativeHandle::from_addr(0).is_none());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NativeHandle(NonZeroUsize);

impl NativeHandle {
    /// Create a handle from a raw address. Returns `None` for null.
    #[inline]
    pub const fn from_addr(addr: usize) -> Option<Self> {
        match NonZeroUsize::new(addr) {
            Some(addr) => Some(NativeHandle(addr)),
            None => None,
        }
    }

    /// Create a handle from a raw pointer. Returns `None` for null.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        Self::from_addr(ptr as usize)
    }

    /// The raw address.
    #[inline]
    pub const fn addr(self) -> usize {
        self.0.get()
    }
}

impl From<NonZeroUsize> for NativeHandle {
    fn from(addr: NonZeroUsize) -> Self {
        NativeHandle(addr)
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.0)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Registration stamp for a handle.
///
/// Every successful registration in the identity registry receives a fresh,
/// strictly increasing generation. A wrapper remembers the generation it was
/// registered under; a mismatch means the address now belongs to a different
/// registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation before any registration.
    pub const ZERO: Generation = Generation(0);

    /// The generation following this one.
    #[inline]
    pub const fn next(self) -> Generation {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_address_has_no_handle() {
        assert!(NativeHandle::from_addr(0).is_none());
        assert!(NativeHandle::from_ptr::<u8>(std::ptr::null()).is_none());
    }

    #[test]
    fn handle_display_is_hex() {
        let handle = NativeHandle::from_addr(0xdead).unwrap();
        assert_eq!(handle.to_string(), "0xdead");
        assert_eq!(format!("{handle:?}"), "NativeHandle(0xdead)");
    }

    #[test]
    fn generations_increase() {
        let g = Generation::ZERO.next().next();
        assert_eq!(g, Generation(2));
        assert!(g > Generation::ZERO);
    }
}
