//! Ownership arbitration.
//!
//! Every tracked object has exactly one [`OwnershipMode`] naming the side
//! responsible for destroying it. The [`OwnershipArbiter`] holds those modes
//! together with the ownership graph, the keep-alive references parents
//! hold on their children's wrappers, and the control blocks of
//! reference-counted objects.
//!
//! ## Transitions
//!
//! ```text
//!                 transfer_to_native
//!   HostOwned ───────────────────────▶ NativeOwned
//!    │    ▲ ◀──────── release ─────────────┘  │
//!    │    │                                   │
//!  adopt  release                           adopt
//!    ▼    │                                   │
//!   ParentManaged { parent } ◀────────────────┘
//!
//!   SharedCounted(control)   fixed at wrap time; destroyed on last release
//! ```
//!
//! The arbiter only keeps books. It never calls into the native runtime and
//! never drops a wrapper itself: every wrapper it lets go of is handed back
//! to the caller, which drops it once the bridge lock is released.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use objbridge_core::{BridgeError, BridgeResult, NativeHandle};
use objbridge_registry::OwnershipGraph;
use rustc_hash::FxHashMap;

use crate::bridge::{Bridge, BridgeShared};
use crate::wrapper::Wrapper;

/// Which side destroys the native object.
#[derive(Clone)]
pub enum OwnershipMode {
    /// Destroyed when the host collects the wrapper.
    HostOwned,
    /// Native code destroys it; the wrapper is only a proxy.
    NativeOwned,
    /// Destroyed together with `parent`, which keeps the wrapper alive.
    ParentManaged { parent: NativeHandle },
    /// Destroyed when the last holder of the control block releases it.
    SharedCounted(Arc<SharedControl>),
}

impl OwnershipMode {
    pub fn is_host_owned(&self) -> bool {
        matches!(self, OwnershipMode::HostOwned)
    }

    pub fn parent(&self) -> Option<NativeHandle> {
        match self {
            OwnershipMode::ParentManaged { parent } => Some(*parent),
            _ => None,
        }
    }
}

impl PartialEq for OwnershipMode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OwnershipMode::HostOwned, OwnershipMode::HostOwned) => true,
            (OwnershipMode::NativeOwned, OwnershipMode::NativeOwned) => true,
            (
                OwnershipMode::ParentManaged { parent: a },
                OwnershipMode::ParentManaged { parent: b },
            ) => a == b,
            (OwnershipMode::SharedCounted(a), OwnershipMode::SharedCounted(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for OwnershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipMode::HostOwned => write!(f, "HostOwned"),
            OwnershipMode::NativeOwned => write!(f, "NativeOwned"),
            OwnershipMode::ParentManaged { parent } => write!(f, "ParentManaged({parent})"),
            OwnershipMode::SharedCounted(control) => {
                write!(f, "SharedCounted({})", control.count())
            }
        }
    }
}

impl fmt::Display for OwnershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipMode::HostOwned => write!(f, "host-owned"),
            OwnershipMode::NativeOwned => write!(f, "native-owned"),
            OwnershipMode::ParentManaged { parent } => write!(f, "owned by {parent}"),
            OwnershipMode::SharedCounted(control) => write!(f, "shared x{}", control.count()),
        }
    }
}

/// Ownership requested when a handle is first wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The host collector destroys the object.
    Host,
    /// Native code keeps ownership.
    Native,
    /// The object is owned by `parent`.
    Parent(NativeHandle),
    /// The object is reference counted; the wrapper holds one count.
    Shared,
}

// ============================================================================
// Shared control block
// ============================================================================

/// Atomic reference count shared by every holder of a counted object.
#[derive(Debug)]
pub struct SharedControl {
    count: AtomicUsize,
}

impl SharedControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(1),
        })
    }

    /// Current number of holders.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one count. `None` if the count was already zero.
    pub(crate) fn release(&self) -> Option<usize> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }
}

/// One count on a reference-counted native object, held outside the wrapper.
///
/// Clones acquire a count; drops release one. The drop that releases the
/// last count destroys the native object.
pub struct SharedRef {
    handle: NativeHandle,
    control: Arc<SharedControl>,
    bridge: Weak<BridgeShared>,
}

impl SharedRef {
    pub(crate) fn new(
        handle: NativeHandle,
        control: Arc<SharedControl>,
        bridge: Weak<BridgeShared>,
    ) -> Self {
        Self {
            handle,
            control,
            bridge,
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Holders of the control block, including the wrapper's own count.
    pub fn count(&self) -> usize {
        self.control.count()
    }
}

impl Clone for SharedRef {
    fn clone(&self) -> Self {
        self.control.acquire();
        Self {
            handle: self.handle,
            control: self.control.clone(),
            bridge: self.bridge.clone(),
        }
    }
}

impl Drop for SharedRef {
    fn drop(&mut self) {
        if self.control.release() != Some(0) {
            return;
        }
        if let Some(shared) = self.bridge.upgrade() {
            Bridge::from_shared(shared).destroy_shared(self.handle, &self.control);
        }
    }
}

impl fmt::Debug for SharedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRef")
            .field("handle", &self.handle)
            .field("count", &self.count())
            .finish()
    }
}

// ============================================================================
// Arbiter
// ============================================================================

/// Destruction authority bookkeeping for every tracked object.
#[derive(Debug)]
pub struct OwnershipArbiter {
    graph: OwnershipGraph,
    modes: FxHashMap<NativeHandle, OwnershipMode>,
    keep_alive: FxHashMap<NativeHandle, Wrapper>,
    shared: FxHashMap<NativeHandle, Arc<SharedControl>>,
    max_depth: usize,
}

impl OwnershipArbiter {
    pub fn new(max_depth: usize) -> Self {
        Self {
            graph: OwnershipGraph::new(),
            modes: FxHashMap::default(),
            keep_alive: FxHashMap::default(),
            shared: FxHashMap::default(),
            max_depth,
        }
    }

    fn conflict(handle: NativeHandle, reason: &'static str) -> BridgeError {
        BridgeError::OwnershipConflict { handle, reason }
    }

    fn mode_of(&self, handle: NativeHandle) -> BridgeResult<&OwnershipMode> {
        self.modes
            .get(&handle)
            .ok_or(BridgeError::StaleHandle(handle))
    }

    pub fn mode(&self, handle: NativeHandle) -> Option<&OwnershipMode> {
        self.modes.get(&handle)
    }

    /// Validate `request` for `handle` without changing anything.
    ///
    /// An object whose control block still has holders stays reference
    /// counted: it can only be wrapped again as [`Ownership::Shared`].
    pub fn check(&self, handle: NativeHandle, request: Ownership) -> BridgeResult<()> {
        if request != Ownership::Shared && self.shared.contains_key(&handle) {
            return Err(Self::conflict(
                handle,
                "the object is reference counted and must be wrapped as shared",
            ));
        }
        match request {
            Ownership::Parent(parent) => self.graph.check_reparent(handle, parent, self.max_depth),
            _ => Ok(()),
        }
    }

    /// Start tracking a freshly registered wrapper.
    pub fn track(&mut self, wrapper: &Wrapper, request: Ownership) -> BridgeResult<OwnershipMode> {
        let handle = wrapper.handle();
        let mode = match request {
            Ownership::Host => OwnershipMode::HostOwned,
            Ownership::Native => OwnershipMode::NativeOwned,
            Ownership::Parent(parent) => {
                self.graph.set_parent(handle, parent, self.max_depth)?;
                self.keep_alive.insert(handle, wrapper.clone());
                OwnershipMode::ParentManaged { parent }
            }
            Ownership::Shared => {
                let control = match self.shared.get(&handle) {
                    Some(existing) => {
                        existing.acquire();
                        existing.clone()
                    }
                    None => {
                        let control = SharedControl::new();
                        self.shared.insert(handle, control.clone());
                        control
                    }
                };
                OwnershipMode::SharedCounted(control)
            }
        };
        self.modes.insert(handle, mode.clone());
        Ok(mode)
    }

    /// Place `child` under `parent`. Moves the child's whole subtree.
    ///
    /// Returns the keep-alive reference it replaces, if any.
    pub fn adopt(&mut self, child: &Wrapper, parent: NativeHandle) -> BridgeResult<Option<Wrapper>> {
        let handle = child.handle();
        if let OwnershipMode::SharedCounted(_) = self.mode_of(handle)? {
            return Err(Self::conflict(handle, "reference-counted objects cannot be parented"));
        }
        self.graph.set_parent(handle, parent, self.max_depth)?;
        self.modes
            .insert(handle, OwnershipMode::ParentManaged { parent });
        Ok(self.keep_alive.insert(handle, child.clone()))
    }

    /// Hand destruction authority back to the host collector.
    ///
    /// Returns the dropped keep-alive reference of a parented object.
    pub fn release(&mut self, handle: NativeHandle) -> BridgeResult<Option<Wrapper>> {
        match self.mode_of(handle)? {
            OwnershipMode::HostOwned => Ok(None),
            OwnershipMode::NativeOwned => {
                self.modes.insert(handle, OwnershipMode::HostOwned);
                Ok(None)
            }
            OwnershipMode::ParentManaged { .. } => {
                self.graph.clear_parent(handle);
                self.modes.insert(handle, OwnershipMode::HostOwned);
                Ok(self.keep_alive.remove(&handle))
            }
            OwnershipMode::SharedCounted(_) => Err(Self::conflict(
                handle,
                "reference-counted objects are released by dropping their references",
            )),
        }
    }

    /// Native code took ownership of a host-owned object.
    pub fn transfer_to_native(&mut self, handle: NativeHandle) -> BridgeResult<()> {
        match self.mode_of(handle)? {
            OwnershipMode::HostOwned => {
                self.modes.insert(handle, OwnershipMode::NativeOwned);
                Ok(())
            }
            OwnershipMode::NativeOwned => Ok(()),
            OwnershipMode::ParentManaged { .. } => {
                Err(Self::conflict(handle, "the object is owned by its parent"))
            }
            OwnershipMode::SharedCounted(_) => {
                Err(Self::conflict(handle, "reference-counted objects cannot change owner"))
            }
        }
    }

    /// Check that the host may destroy the object explicitly.
    pub fn check_delete(&self, handle: NativeHandle) -> BridgeResult<()> {
        match self.mode_of(handle)? {
            OwnershipMode::HostOwned | OwnershipMode::ParentManaged { .. } => Ok(()),
            OwnershipMode::NativeOwned => Err(Self::conflict(handle, "native code owns the object")),
            OwnershipMode::SharedCounted(_) => Err(Self::conflict(
                handle,
                "reference-counted objects are destroyed by their last reference",
            )),
        }
    }

    /// Acquire one more count on a reference-counted object.
    pub fn share(&self, handle: NativeHandle) -> BridgeResult<Arc<SharedControl>> {
        match self.mode_of(handle)? {
            OwnershipMode::SharedCounted(control) => {
                control.acquire();
                Ok(control.clone())
            }
            _ => Err(Self::conflict(handle, "the object is not reference counted")),
        }
    }

    /// Whether collecting the wrapper would destroy the native object.
    pub fn can_collect(&self, handle: NativeHandle) -> bool {
        match self.modes.get(&handle) {
            Some(OwnershipMode::HostOwned) => true,
            Some(OwnershipMode::SharedCounted(control)) => control.count() == 1,
            _ => false,
        }
    }

    /// Detach `control` from `handle` if it is still the object's block.
    pub fn take_shared(&mut self, handle: NativeHandle, control: &Arc<SharedControl>) -> bool {
        match self.shared.get(&handle) {
            Some(current) if Arc::ptr_eq(current, control) => {
                self.shared.remove(&handle);
                true
            }
            _ => false,
        }
    }

    /// Stop tracking a collected wrapper whose object lives on.
    ///
    /// Ownership relations and control blocks stay: they belong to the
    /// native object, not to the wrapper.
    pub fn forget(&mut self, handle: NativeHandle) {
        self.modes.remove(&handle);
    }

    /// Stop tracking an unregistered wrapper while its object lives on.
    ///
    /// The wrapper's own count on a shared object is released. The object
    /// keeps its place in the graph, so destroying an ancestor still
    /// reaches its owned children. Returns its keep-alive reference.
    pub fn detach(&mut self, handle: NativeHandle) -> Option<Wrapper> {
        if let Some(OwnershipMode::SharedCounted(control)) = self.modes.remove(&handle)
            && control.release() == Some(0)
        {
            self.take_shared(handle, &control);
        }
        self.keep_alive.remove(&handle)
    }

    /// Whether `handle` still has a parent or children.
    pub fn is_related(&self, handle: NativeHandle) -> bool {
        self.graph.parent(handle).is_some() || self.graph.has_children(handle)
    }

    /// Drop everything known about a destroyed object.
    ///
    /// Returns its keep-alive reference. Its children become roots.
    pub fn remove(&mut self, handle: NativeHandle) -> Option<Wrapper> {
        self.modes.remove(&handle);
        self.shared.remove(&handle);
        self.graph.remove(handle);
        self.keep_alive.remove(&handle)
    }

    /// `root` and its descendants, in cascade order.
    pub fn descendants(&self, root: NativeHandle) -> Vec<NativeHandle> {
        self.graph.descendants_preorder(root)
    }

    pub fn parent(&self, handle: NativeHandle) -> Option<NativeHandle> {
        self.graph.parent(handle)
    }

    pub fn children(&self, handle: NativeHandle) -> Vec<NativeHandle> {
        self.graph.children(handle)
    }

    /// Hand every object to native code and drop all relations.
    ///
    /// Returns the keep-alive references that were held.
    pub fn shutdown(&mut self) -> Vec<Wrapper> {
        for mode in self.modes.values_mut() {
            *mode = OwnershipMode::NativeOwned;
        }
        self.graph.clear();
        self.shared.clear();
        self.keep_alive.drain().map(|(_, w)| w).collect()
    }
}
