//! Identity registry: native handle to host wrapper.
//!
//! Guarantees at most one live wrapper per native handle. The registry
//! stores whatever the caller uses to refer to a wrapper without owning it
//! (in practice a `std::sync::Weak`), and asks it through [`Liveness`]
//! whether the wrapper still exists.
//!
//! # Entry lifecycle
//!
//! ```text
//!            register                begin_destruction           retire
//! (absent) ───────────▶ Live(gen) ─────────────────────▶ Destroying ──────▶ retired
//!     ▲                    │ forget (wrapper collected,                       │
//!     └────────────────────┘  native object survives)                         │
//!     ▲                                                                       │
//!     └────────────────────────────── register (address reused) ◀─────────────┘
//! ```
//!
//! A retired handle is rejected with `StaleHandle` by every operation except
//! `register`: address reuse is only accepted after the destruction
//! notification for the previous occupant retired it.

use objbridge_core::{BridgeError, BridgeResult, Generation, NativeHandle};
use rustc_hash::{FxHashMap, FxHashSet};

/// Reports whether a non-owning wrapper reference still points at a wrapper.
pub trait Liveness {
    /// `true` while the wrapper exists.
    fn is_live(&self) -> bool;
}

impl<T> Liveness for std::sync::Weak<T> {
    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

#[derive(Debug)]
enum EntryState<W> {
    Live(W),
    Destroying,
}

#[derive(Debug)]
struct Entry<W> {
    generation: Generation,
    state: EntryState<W>,
}

/// Bidirectional handle/wrapper map.
///
/// The reverse direction (wrapper to handle) is carried by the wrapper
/// itself; the registry only needs the forward map to enforce uniqueness.
///
/// The retired set keeps one entry per destroyed or unregistered handle
/// until that address is registered again or [`clear_retired`] runs, so it
/// grows with the number of distinct addresses that were ever wrapped.
///
/// [`clear_retired`]: IdentityRegistry::clear_retired
#[derive(Debug)]
pub struct IdentityRegistry<W> {
    entries: FxHashMap<NativeHandle, Entry<W>>,
    retired: FxHashSet<NativeHandle>,
    last_generation: Generation,
}

impl<W> Default for IdentityRegistry<W> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
            retired: FxHashSet::default(),
            last_generation: Generation::ZERO,
        }
    }
}

impl<W: Liveness> IdentityRegistry<W> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapper registered for `handle`, if it is still alive.
    ///
    /// Retired handles, handles being destroyed, and entries whose wrapper
    /// has been collected all resolve to `None`.
    pub fn resolve(&self, handle: NativeHandle) -> Option<&W> {
        match self.entries.get(&handle) {
            Some(Entry {
                state: EntryState::Live(w),
                ..
            }) if w.is_live() => Some(w),
            _ => None,
        }
    }

    /// Register a wrapper for `handle` and stamp it with a fresh generation.
    ///
    /// # Errors
    ///
    /// - `DuplicateIdentity` if a live wrapper is already registered
    /// - `DestructionInProgress` if the handle is being destroyed
    pub fn register(&mut self, handle: NativeHandle, wrapper: W) -> BridgeResult<Generation> {
        self.register_with(handle, |generation| (wrapper, generation))
    }

    /// Register a wrapper built from its generation.
    ///
    /// `make` runs only once every precondition holds, so a wrapper that
    /// would be rejected is never constructed. It returns the reference to
    /// store and a value handed back to the caller (typically the owning
    /// side of the wrapper).
    ///
    /// # Errors
    ///
    /// Same as [`register`](IdentityRegistry::register).
    pub fn register_with<R>(
        &mut self,
        handle: NativeHandle,
        make: impl FnOnce(Generation) -> (W, R),
    ) -> BridgeResult<R> {
        if let Some(entry) = self.entries.get(&handle) {
            match &entry.state {
                EntryState::Destroying => return Err(BridgeError::DestructionInProgress(handle)),
                EntryState::Live(w) if w.is_live() => {
                    return Err(BridgeError::DuplicateIdentity(handle));
                }
                EntryState::Live(_) => {}
            }
        }

        self.retired.remove(&handle);
        self.last_generation = self.last_generation.next();
        let generation = self.last_generation;
        let (wrapper, made) = make(generation);
        self.entries.insert(
            handle,
            Entry {
                generation,
                state: EntryState::Live(wrapper),
            },
        );
        Ok(made)
    }

    /// Remove the mapping for `handle` and retire it.
    ///
    /// Returns the wrapper reference if the entry was live.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle is retired or was never registered.
    pub fn unregister(&mut self, handle: NativeHandle) -> BridgeResult<Option<W>> {
        if self.retired.contains(&handle) {
            return Err(BridgeError::StaleHandle(handle));
        }
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(BridgeError::StaleHandle(handle))?;
        self.retired.insert(handle);
        Ok(match entry.state {
            EntryState::Live(w) => Some(w),
            EntryState::Destroying => None,
        })
    }

    /// Mark the entry registered under `generation` as being destroyed.
    ///
    /// While destroying, the handle resolves to nothing and cannot be
    /// registered again. Returns the wrapper reference that was stored.
    ///
    /// # Errors
    ///
    /// - `StaleHandle` if the handle is retired, unknown, or registered under
    ///   a different generation
    /// - `DestructionInProgress` if destruction already began
    pub fn begin_destruction(
        &mut self,
        handle: NativeHandle,
        generation: Generation,
    ) -> BridgeResult<Option<W>> {
        let entry = match self.entries.get_mut(&handle) {
            Some(entry) if entry.generation == generation => entry,
            _ => return Err(BridgeError::StaleHandle(handle)),
        };
        match std::mem::replace(&mut entry.state, EntryState::Destroying) {
            EntryState::Live(w) => Ok(Some(w)),
            EntryState::Destroying => Err(BridgeError::DestructionInProgress(handle)),
        }
    }

    /// Remove the entry as part of native destruction and retire the handle.
    ///
    /// Returns `false` if nothing was registered (the object never crossed
    /// into host code, or a cascade already retired it).
    pub fn retire(&mut self, handle: NativeHandle) -> bool {
        if self.entries.remove(&handle).is_some() {
            self.retired.insert(handle);
            true
        } else {
            false
        }
    }

    /// Drop the entry of a collected wrapper without retiring the handle.
    ///
    /// Only removes the entry registered under `generation`, so a wrapper
    /// created for the same handle in the meantime is left untouched.
    pub fn forget(&mut self, handle: NativeHandle, generation: Generation) -> bool {
        match self.entries.get(&handle) {
            Some(Entry {
                generation: g,
                state: EntryState::Live(_),
            }) if *g == generation => {
                self.entries.remove(&handle);
                true
            }
            _ => false,
        }
    }

    /// Current generation of `handle`, or `None` if it is not registered.
    ///
    /// # Errors
    ///
    /// `StaleHandle` if the handle is retired.
    pub fn generation(&self, handle: NativeHandle) -> BridgeResult<Option<Generation>> {
        if self.retired.contains(&handle) {
            return Err(BridgeError::StaleHandle(handle));
        }
        Ok(self.entries.get(&handle).map(|e| e.generation))
    }

    /// Whether `handle` was retired by a destruction or an unregister.
    pub fn is_retired(&self, handle: NativeHandle) -> bool {
        self.retired.contains(&handle)
    }

    /// Number of retired handles.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Forget every retired handle.
    ///
    /// Afterwards those handles read as never registered instead of
    /// `StaleHandle`.
    pub fn clear_retired(&mut self) {
        self.retired.clear();
        self.retired.shrink_to_fit();
    }

    /// Whether destruction of `handle` has begun but not completed.
    pub fn is_destroying(&self, handle: NativeHandle) -> bool {
        matches!(
            self.entries.get(&handle),
            Some(Entry {
                state: EntryState::Destroying,
                ..
            })
        )
    }

    /// Number of entries, including ones whose wrapper was collected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry whose wrapper is still alive.
    pub fn live(&self) -> impl Iterator<Item = (NativeHandle, &W)> {
        self.entries.iter().filter_map(|(h, e)| match &e.state {
            EntryState::Live(w) if w.is_live() => Some((*h, w)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    fn handle(addr: usize) -> NativeHandle {
        NativeHandle::from_addr(addr).unwrap()
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = IdentityRegistry::new();
        let wrapper = Arc::new("w");
        registry.register(handle(0x10), Arc::downgrade(&wrapper)).unwrap();

        let resolved = registry.resolve(handle(0x10)).and_then(Weak::upgrade).unwrap();
        assert!(Arc::ptr_eq(&resolved, &wrapper));
        assert!(registry.resolve(handle(0x20)).is_none());
    }

    #[test]
    fn duplicate_live_identity_is_rejected() {
        let mut registry = IdentityRegistry::new();
        let first = Arc::new(1);
        let second = Arc::new(2);
        registry.register(handle(0x10), Arc::downgrade(&first)).unwrap();

        let err = registry
            .register(handle(0x10), Arc::downgrade(&second))
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateIdentity(h) if h == handle(0x10)));
    }

    #[test]
    fn collected_wrapper_can_be_replaced() {
        let mut registry = IdentityRegistry::new();
        let first = Arc::new(1);
        let g1 = registry.register(handle(0x10), Arc::downgrade(&first)).unwrap();
        drop(first);
        assert!(registry.resolve(handle(0x10)).is_none());

        let second = Arc::new(2);
        let g2 = registry.register(handle(0x10), Arc::downgrade(&second)).unwrap();
        assert!(g2 > g1);
        // the stale finalizer of the first wrapper must not remove the new entry
        assert!(!registry.forget(handle(0x10), g1));
        assert!(registry.resolve(handle(0x10)).is_some());
    }

    #[test]
    fn unregister_twice_is_stale() {
        let mut registry = IdentityRegistry::new();
        let wrapper = Arc::new(());
        registry.register(handle(0x10), Arc::downgrade(&wrapper)).unwrap();

        assert!(registry.unregister(handle(0x10)).unwrap().is_some());
        assert!(matches!(
            registry.unregister(handle(0x10)),
            Err(BridgeError::StaleHandle(_))
        ));
        assert!(matches!(
            registry.generation(handle(0x10)),
            Err(BridgeError::StaleHandle(_))
        ));
    }

    #[test]
    fn unregister_unknown_is_stale() {
        let mut registry = IdentityRegistry::<Weak<()>>::new();
        assert!(matches!(
            registry.unregister(handle(0x99)),
            Err(BridgeError::StaleHandle(_))
        ));
    }

    #[test]
    fn retired_handle_can_be_reused_by_register() {
        let mut registry = IdentityRegistry::new();
        let old = Arc::new(());
        registry.register(handle(0x10), Arc::downgrade(&old)).unwrap();
        assert!(registry.retire(handle(0x10)));
        assert!(registry.is_retired(handle(0x10)));
        assert!(registry.resolve(handle(0x10)).is_none());

        let new = Arc::new(());
        registry.register(handle(0x10), Arc::downgrade(&new)).unwrap();
        assert!(!registry.is_retired(handle(0x10)));
        assert!(registry.resolve(handle(0x10)).is_some());
    }

    #[test]
    fn clear_retired_forgets_stale_handles() {
        let mut registry = IdentityRegistry::new();
        let wrappers: Vec<Arc<()>> = (1..=3).map(|_| Arc::new(())).collect();
        for (i, wrapper) in wrappers.iter().enumerate() {
            let addr = (i + 1) * 0x10;
            registry.register(handle(addr), Arc::downgrade(wrapper)).unwrap();
            assert!(registry.retire(handle(addr)));
        }
        assert_eq!(registry.retired_len(), 3);

        registry.clear_retired();
        assert_eq!(registry.retired_len(), 0);
        assert!(!registry.is_retired(handle(0x10)));
        assert_eq!(registry.generation(handle(0x10)).unwrap(), None);
    }

    #[test]
    fn destroying_blocks_resolution_and_registration() {
        let mut registry = IdentityRegistry::new();
        let wrapper = Arc::new(());
        let generation = registry.register(handle(0x10), Arc::downgrade(&wrapper)).unwrap();

        registry.begin_destruction(handle(0x10), generation).unwrap();
        assert!(registry.is_destroying(handle(0x10)));
        assert!(registry.resolve(handle(0x10)).is_none());

        let other = Arc::new(());
        assert!(matches!(
            registry.register(handle(0x10), Arc::downgrade(&other)),
            Err(BridgeError::DestructionInProgress(_))
        ));
        assert!(matches!(
            registry.begin_destruction(handle(0x10), generation),
            Err(BridgeError::DestructionInProgress(_))
        ));

        assert!(registry.retire(handle(0x10)));
        assert!(!registry.retire(handle(0x10)));
    }

    #[test]
    fn begin_destruction_checks_generation() {
        let mut registry = IdentityRegistry::new();
        let wrapper = Arc::new(());
        let generation = registry.register(handle(0x10), Arc::downgrade(&wrapper)).unwrap();
        assert!(matches!(
            registry.begin_destruction(handle(0x10), generation.next()),
            Err(BridgeError::StaleHandle(_))
        ));
    }

    #[test]
    fn live_iterates_only_alive_wrappers() {
        let mut registry = IdentityRegistry::new();
        let kept = Arc::new(());
        let dropped = Arc::new(());
        registry.register(handle(0x10), Arc::downgrade(&kept)).unwrap();
        registry.register(handle(0x20), Arc::downgrade(&dropped)).unwrap();
        drop(dropped);

        let live: Vec<_> = registry.live().map(|(h, _)| h).collect();
        assert_eq!(live, vec![handle(0x10)]);
        assert_eq!(registry.len(), 2);
    }
}
