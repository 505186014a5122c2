//! Deterministic hash-based identity for types, operations and signals.
//!
//! [`TypeHash`] is a 64-bit hash computed from a name. Because the hash is a
//! pure function of the name, a base type can be referenced before it is
//! looked up, and the same name always maps to the same identity.
//!
//! Uses XXHash64 with domain-specific mixing constants so that a type named
//! `clicked` and a signal named `clicked` never collide.
//!
//! ```
//! use objbridge_core::TypeHash;
//!
//! let a = TypeHash::from_name("QObject");
//! let b = TypeHash::from_name("QObject");
//! assert_eq!(a, b);
//! assert_ne!(TypeHash::from_operation("clicked"), TypeHash::from_signal("clicked"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for virtual/non-virtual operation hashes
    pub const OPERATION: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for signal hashes
    pub const SIGNAL: u64 = 0x3e9f5d2a8c7b1403;
}

/// A deterministic 64-bit hash identifying a type, operation, or signal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a qualified type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create an operation hash from its name.
    ///
    /// Operations are looked up by name across the whole hierarchy, so the
    /// owner type is deliberately not mixed in: `Base::paint` and
    /// `Derived::paint` share a hash, which is what makes overriding work.
    #[inline]
    pub fn from_operation(name: &str) -> Self {
        TypeHash(hash_constants::OPERATION ^ xxh64(name.as_bytes(), 0))
    }

    /// Create a signal hash from its name.
    #[inline]
    pub fn from_signal(name: &str) -> Self {
        TypeHash(hash_constants::SIGNAL ^ xxh64(name.as_bytes(), 0))
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
