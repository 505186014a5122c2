//! Host-side wrappers around native objects.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use objbridge_core::{Generation, NativeHandle, TypeHash};

use crate::bridge::{Bridge, BridgeShared};
use crate::ownership::OwnershipMode;

pub(crate) struct WrapperInner {
    handle: NativeHandle,
    type_hash: TypeHash,
    type_name: String,
    generation: Generation,
    created_by_host: bool,
    valid: AtomicBool,
    bridge: Weak<BridgeShared>,
}

impl WrapperInner {
    pub(crate) fn new(
        handle: NativeHandle,
        type_hash: TypeHash,
        type_name: String,
        generation: Generation,
        created_by_host: bool,
        bridge: Weak<BridgeShared>,
    ) -> Self {
        Self {
            handle,
            type_hash,
            type_name,
            generation,
            created_by_host,
            valid: AtomicBool::new(true),
            bridge,
        }
    }

    // Only flipped while the bridge state is write-locked.
    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

// Host collection: the last `Wrapper` clone went away.
impl Drop for WrapperInner {
    fn drop(&mut self) {
        if !self.valid.load(Ordering::Acquire) {
            return;
        }
        if let Some(shared) = self.bridge.upgrade() {
            Bridge::from_shared(shared).collect(self.handle, self.generation);
        }
    }
}

/// The host-side proxy of one native instance.
///
/// Clones share one identity; [`Wrapper::ptr_eq`] tells whether two values
/// are the same wrapper. A wrapper never owns its bridge: dropping the last
/// `Bridge` leaves wrappers usable only for introspection.
#[derive(Clone)]
pub struct Wrapper(pub(crate) Arc<WrapperInner>);

impl Wrapper {
    pub fn handle(&self) -> NativeHandle {
        self.0.handle
    }

    /// Most-derived registered type.
    pub fn type_hash(&self) -> TypeHash {
        self.0.type_hash
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Registration the wrapper was created under.
    pub fn generation(&self) -> Generation {
        self.0.generation
    }

    /// `false` once the native object has been destroyed or the handle
    /// unregistered.
    pub fn is_valid(&self) -> bool {
        self.0.valid.load(Ordering::Acquire)
    }

    /// Whether host code constructed the object, as opposed to capturing
    /// one native code returned.
    pub fn created_by_host(&self) -> bool {
        self.0.created_by_host
    }

    pub fn ptr_eq(a: &Wrapper, b: &Wrapper) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// The bridge this wrapper belongs to, if it still exists.
    pub fn bridge(&self) -> Option<Bridge> {
        self.0.bridge.upgrade().map(Bridge::from_shared)
    }

    /// Current ownership mode, if the bridge still tracks the wrapper.
    pub fn ownership(&self) -> Option<OwnershipMode> {
        self.bridge()?.ownership_of(self)
    }

    pub(crate) fn downgrade(&self) -> Weak<WrapperInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn invalidate(&self) {
        self.0.invalidate();
    }
}

#[cfg(test)]
impl Wrapper {
    /// A wrapper attached to no bridge.
    pub(crate) fn detached(handle: NativeHandle, type_name: &str) -> Self {
        Wrapper(Arc::new(WrapperInner::new(
            handle,
            TypeHash::from_name(type_name),
            type_name.to_string(),
            Generation::ZERO,
            false,
            Weak::new(),
        )))
    }
}

impl PartialEq for Wrapper {
    fn eq(&self, other: &Self) -> bool {
        Wrapper::ptr_eq(self, other)
    }
}

impl Eq for Wrapper {}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("handle", &self.0.handle)
            .field("type", &self.0.type_name)
            .field("generation", &self.0.generation)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl From<&Wrapper> for NativeHandle {
    fn from(wrapper: &Wrapper) -> Self {
        wrapper.handle()
    }
}

/// Snapshot of a wrapper's bookkeeping, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapperInfo {
    pub handle: NativeHandle,
    pub type_name: String,
    pub generation: Generation,
    pub valid: bool,
    pub created_by_host: bool,
    /// `None` once the bridge stopped tracking the handle.
    pub ownership: Option<OwnershipMode>,
    pub parent: Option<NativeHandle>,
    pub children: Vec<NativeHandle>,
    /// Active connections with this object as source.
    pub connections: usize,
}

impl fmt::Display for WrapperInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {}", self.type_name, self.handle, self.generation)?;
        match &self.ownership {
            Some(mode) => write!(f, " [{mode}]")?,
            None => write!(f, " [untracked]")?,
        }
        if !self.valid {
            write!(f, " INVALID")?;
        }
        if self.created_by_host {
            write!(f, " host-created")?;
        }
        if let Some(parent) = self.parent {
            write!(f, " parent={parent}")?;
        }
        write!(
            f,
            " children={} connections={}",
            self.children.len(),
            self.connections
        )
    }
}
