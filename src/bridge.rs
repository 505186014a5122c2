//! The bridge context.
//!
//! A [`Bridge`] owns the identity registry, the ownership arbiter, the
//! connection registry and the dispatch tables of one embedding. It is
//! cheap to clone and safe to share between threads.
//!
//! # Locking
//!
//! Identity, ownership and connections change together under one
//! `RwLock<BridgeState>`. Types and dispatch chains live behind a second
//! lock that is never held together with the first. Neither lock is held
//! while host callables or the native runtime run, which lets both re-enter
//! the bridge freely.
//!
//! Dropping a wrapper can run host collection, which takes the state lock.
//! Wrappers and callables released by bookkeeping are therefore collected
//! in a [`Deferred`] and dropped after the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use objbridge_core::{
    BridgeError, BridgeResult, EmitError, Generation, NativeHandle, SignalDecl, SlotFailure,
    TypeDescriptor, TypeHash, Value, ValueKind,
};
use objbridge_registry::IdentityRegistry;
use parking_lot::RwLock;

use crate::callable::{CallFrame, CallSite, HostClass, HostFn};
use crate::config::BridgeConfig;
use crate::dispatch::{DepthGuard, DispatchChain, DispatchTable, Target, VirtualDispatch};
use crate::native::{NativeCall, NativeRuntime};
use crate::ownership::{Ownership, OwnershipArbiter, OwnershipMode, SharedControl, SharedRef};
use crate::signals::{Connection, ConnectionRegistry};
use crate::wrapper::{Wrapper, WrapperInfo, WrapperInner};

pub(crate) struct BridgeState {
    identity: IdentityRegistry<Weak<WrapperInner>>,
    arbiter: OwnershipArbiter,
    connections: ConnectionRegistry,
}

impl BridgeState {
    fn resolve(&self, handle: NativeHandle) -> Option<Wrapper> {
        self.identity
            .resolve(handle)
            .and_then(Weak::upgrade)
            .map(Wrapper)
    }
}

pub(crate) struct BridgeShared {
    state: RwLock<BridgeState>,
    dispatch: RwLock<DispatchTable>,
    runtime: Arc<dyn NativeRuntime>,
    config: BridgeConfig,
    shut_down: AtomicBool,
}

/// Strong references released under the state lock, dropped after it.
#[derive(Default)]
struct Deferred {
    wrappers: Vec<Wrapper>,
    callables: Vec<HostFn>,
}

/// Runtime bridge between host code and a native object system.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Bridge {
    /// Create a bridge with the default configuration.
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self::with_config(runtime, BridgeConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn NativeRuntime>, config: BridgeConfig) -> Self {
        let state = BridgeState {
            identity: IdentityRegistry::new(),
            arbiter: OwnershipArbiter::new(config.max_ancestor_depth),
            connections: ConnectionRegistry::new(),
        };
        Self {
            shared: Arc::new(BridgeShared {
                state: RwLock::new(state),
                dispatch: RwLock::new(DispatchTable::new()),
                runtime,
                config,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<BridgeShared>) -> Self {
        Self { shared }
    }

    fn weak(&self) -> Weak<BridgeShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.is_shut_down() {
            Err(BridgeError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn ensure_valid(wrapper: &Wrapper) -> BridgeResult<()> {
        if wrapper.is_valid() {
            Ok(())
        } else {
            Err(BridgeError::UseAfterFree(wrapper.handle()))
        }
    }

    // =========================================================================
    // Type registration
    // =========================================================================

    /// Register a native class. Its bases must be registered first.
    pub fn register_native_type(&self, descriptor: TypeDescriptor) -> BridgeResult<TypeHash> {
        let name = descriptor.name().to_string();
        let hash = self.shared.dispatch.write().register_native(descriptor)?;
        debug!("registered native type '{name}' as {hash}");
        Ok(hash)
    }

    /// Register a host subclass and its overrides.
    pub fn register_host_type(&self, class: HostClass) -> BridgeResult<TypeHash> {
        let name = class.descriptor().name().to_string();
        let overrides = class.overrides().len();
        let hash = self.shared.dispatch.write().register_host(class)?;
        debug!("registered host type '{name}' with {overrides} override(s)");
        Ok(hash)
    }

    /// Method resolution order of a type, most derived first.
    pub fn mro(&self, type_hash: TypeHash) -> Option<Vec<TypeHash>> {
        self.shared
            .dispatch
            .read()
            .types()
            .mro(type_hash)
            .map(<[TypeHash]>::to_vec)
    }

    /// Whether `derived` is `base` or inherits from it.
    pub fn is_subtype(&self, derived: TypeHash, base: TypeHash) -> bool {
        self.shared.dispatch.read().types().is_subtype(derived, base)
    }

    /// The implementation a call of `operation` on `type_hash` resolves to.
    pub fn dispatch_target(&self, type_hash: TypeHash, operation: &str) -> BridgeResult<Target> {
        self.shared.dispatch.read().lookup(type_hash, operation)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Wrap a native object, or return its existing wrapper.
    ///
    /// `ownership` only applies when a new wrapper is created.
    pub fn wrap(
        &self,
        handle: NativeHandle,
        type_hash: TypeHash,
        ownership: Ownership,
    ) -> BridgeResult<Wrapper> {
        self.create_wrapper(handle, type_hash, ownership, false)
    }

    /// Wrap an object host code just constructed. It starts host-owned.
    ///
    /// Fails with `DuplicateIdentity` if the handle already has a live
    /// wrapper.
    pub fn construct(&self, handle: NativeHandle, type_hash: TypeHash) -> BridgeResult<Wrapper> {
        self.create_wrapper(handle, type_hash, Ownership::Host, true)
    }

    fn create_wrapper(
        &self,
        handle: NativeHandle,
        type_hash: TypeHash,
        ownership: Ownership,
        created_by_host: bool,
    ) -> BridgeResult<Wrapper> {
        self.ensure_running()?;
        let type_name = self
            .shared
            .dispatch
            .read()
            .types()
            .get(type_hash)
            .map(|d| d.name().to_string())
            .ok_or(BridgeError::TypeNotRegistered(type_hash))?;

        let mut deferred = Deferred::default();
        let result = {
            let mut state = self.shared.state.write();
            match state.resolve(handle) {
                Some(existing) if !created_by_host => {
                    trace!("wrap {handle}: returning existing wrapper");
                    Ok(existing)
                }
                Some(existing) => {
                    // a constructed object cannot already be wrapped
                    deferred.wrappers.push(existing);
                    Err(BridgeError::DuplicateIdentity(handle))
                }
                None => self.register_wrapper(
                    &mut state,
                    &mut deferred,
                    handle,
                    type_hash,
                    type_name,
                    ownership,
                    created_by_host,
                ),
            }
        };
        drop(deferred);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn register_wrapper(
        &self,
        state: &mut BridgeState,
        deferred: &mut Deferred,
        handle: NativeHandle,
        type_hash: TypeHash,
        type_name: String,
        ownership: Ownership,
        created_by_host: bool,
    ) -> BridgeResult<Wrapper> {
        if let Ownership::Parent(parent) = ownership
            && state.identity.is_retired(parent)
        {
            return Err(BridgeError::StaleHandle(parent));
        }
        state.arbiter.check(handle, ownership)?;

        let bridge = self.weak();
        let wrapper = state.identity.register_with(handle, |generation| {
            let inner = Arc::new(WrapperInner::new(
                handle,
                type_hash,
                type_name,
                generation,
                created_by_host,
                bridge,
            ));
            (Arc::downgrade(&inner), Wrapper(inner))
        })?;

        match state.arbiter.track(&wrapper, ownership) {
            Ok(mode) => {
                debug!(
                    "wrapped {handle} as '{}' ({}, {mode})",
                    wrapper.type_name(),
                    wrapper.generation()
                );
                Ok(wrapper)
            }
            Err(err) => {
                // undo the registration without running host collection
                wrapper.invalidate();
                state.identity.forget(handle, wrapper.generation());
                deferred.wrappers.push(wrapper);
                Err(err)
            }
        }
    }

    /// The live wrapper of `handle`, if any.
    pub fn resolve(&self, handle: NativeHandle) -> Option<Wrapper> {
        self.shared.state.read().resolve(handle)
    }

    /// Like [`resolve`](Bridge::resolve), but a retired handle is an error.
    pub fn lookup(&self, handle: NativeHandle) -> BridgeResult<Option<Wrapper>> {
        let state = self.shared.state.read();
        if state.identity.is_retired(handle) {
            return Err(BridgeError::StaleHandle(handle));
        }
        Ok(state.resolve(handle))
    }

    /// Remove the mapping of `handle` without destroying the object.
    ///
    /// Its wrapper becomes invalid, its connections are dropped, and the
    /// handle is rejected with `StaleHandle` until wrapped again. Objects it
    /// owns stay owned: a later destruction notice for `handle` still
    /// cascades to them.
    pub fn unregister(&self, handle: NativeHandle) -> BridgeResult<()> {
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.write();
            if let Some(wrapper) = state.identity.unregister(handle)?.and_then(|w| w.upgrade()) {
                let wrapper = Wrapper(wrapper);
                wrapper.invalidate();
                deferred.wrappers.push(wrapper);
            }
            deferred
                .callables
                .extend(state.connections.on_endpoint_destroyed(handle));
            deferred.wrappers.extend(state.arbiter.detach(handle));
        }
        debug!("unregistered {handle}");
        drop(deferred);
        Ok(())
    }

    pub fn is_valid(&self, wrapper: &Wrapper) -> bool {
        wrapper.is_valid()
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    pub(crate) fn ownership_of(&self, wrapper: &Wrapper) -> Option<OwnershipMode> {
        let state = self.shared.state.read();
        match state.identity.generation(wrapper.handle()) {
            Ok(Some(generation)) if generation == wrapper.generation() => {
                state.arbiter.mode(wrapper.handle()).cloned()
            }
            _ => None,
        }
    }

    /// Make `parent` the owner of `child`.
    ///
    /// Reparenting a parented object moves it with its whole subtree.
    pub fn adopt(&self, child: &Wrapper, parent: impl Into<NativeHandle>) -> BridgeResult<()> {
        self.ensure_running()?;
        Self::ensure_valid(child)?;
        let parent = parent.into();
        let handle = child.handle();

        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.write();
            if state.identity.is_retired(parent) {
                return Err(BridgeError::StaleHandle(parent));
            }
            if state.identity.is_destroying(handle) {
                return Err(BridgeError::DestructionInProgress(handle));
            }
            if state.identity.is_destroying(parent) {
                return Err(BridgeError::DestructionInProgress(parent));
            }
            deferred.wrappers.extend(state.arbiter.adopt(child, parent)?);
        }
        debug!("{handle} is now owned by {parent}");
        drop(deferred);
        Ok(())
    }

    /// Give destruction authority back to the host collector.
    pub fn release(&self, wrapper: &Wrapper) -> BridgeResult<()> {
        Self::ensure_valid(wrapper)?;
        let handle = wrapper.handle();
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.write();
            if state.identity.is_destroying(handle) {
                return Err(BridgeError::DestructionInProgress(handle));
            }
            deferred.wrappers.extend(state.arbiter.release(handle)?);
        }
        debug!("{handle} released to the host");
        drop(deferred);
        Ok(())
    }

    /// Native code took ownership of a host-owned object.
    pub fn transfer_to_native(&self, wrapper: &Wrapper) -> BridgeResult<()> {
        Self::ensure_valid(wrapper)?;
        let handle = wrapper.handle();
        let mut state = self.shared.state.write();
        if state.identity.is_destroying(handle) {
            return Err(BridgeError::DestructionInProgress(handle));
        }
        state.arbiter.transfer_to_native(handle)?;
        debug!("{handle} transferred to native ownership");
        Ok(())
    }

    /// Destroy the native object now, on behalf of the host.
    pub fn delete(&self, wrapper: &Wrapper) -> BridgeResult<()> {
        self.ensure_running()?;
        Self::ensure_valid(wrapper)?;
        let handle = wrapper.handle();
        {
            let mut state = self.shared.state.write();
            state.arbiter.check_delete(handle)?;
            state
                .identity
                .begin_destruction(handle, wrapper.generation())?;
            wrapper.invalidate();
        }
        debug!("deleting {handle} on host request");
        self.shared.runtime.destroy(handle);
        self.on_native_destroyed(handle);
        Ok(())
    }

    /// Acquire one more count on a reference-counted object.
    pub fn share(&self, wrapper: &Wrapper) -> BridgeResult<SharedRef> {
        self.ensure_running()?;
        Self::ensure_valid(wrapper)?;
        let control = self.shared.state.read().arbiter.share(wrapper.handle())?;
        Ok(SharedRef::new(wrapper.handle(), control, self.weak()))
    }

    /// Whether collecting `wrapper` now would destroy the native object.
    pub fn can_collect(&self, wrapper: &Wrapper) -> bool {
        if !wrapper.is_valid() || self.is_shut_down() {
            return false;
        }
        let state = self.shared.state.read();
        let current = matches!(
            state.identity.generation(wrapper.handle()),
            Ok(Some(g)) if g == wrapper.generation()
        );
        current
            && !state.identity.is_destroying(wrapper.handle())
            && state.arbiter.can_collect(wrapper.handle())
    }

    // Host collection of the wrapper registered under `generation`.
    pub(crate) fn collect(&self, handle: NativeHandle, generation: Generation) {
        if self.is_shut_down() {
            return;
        }
        let destroy = {
            let mut state = self.shared.state.write();
            match state.identity.generation(handle) {
                Ok(Some(current)) if current == generation => {}
                _ => {
                    trace!("collect {handle} ({generation}): superseded, nothing to do");
                    return;
                }
            }

            let mode = state.arbiter.mode(handle).cloned();
            let destroy = match mode {
                Some(OwnershipMode::HostOwned) => self.shared.config.destroy_on_collect,
                Some(OwnershipMode::SharedCounted(control)) => match control.release() {
                    Some(0) => state.arbiter.take_shared(handle, &control),
                    _ => false,
                },
                _ => false,
            };

            if destroy {
                if let Err(err) = state.identity.begin_destruction(handle, generation) {
                    warn!("collect {handle}: {err}");
                    return;
                }
            } else {
                state.identity.forget(handle, generation);
                state.arbiter.forget(handle);
            }
            destroy
        };

        if destroy {
            debug!("host collected {handle}; destroying native object");
            self.shared.runtime.destroy(handle);
            self.on_native_destroyed(handle);
        } else {
            trace!("host collected {handle}; native object kept");
        }
    }

    // Last count of a reference-counted object released through a SharedRef.
    pub(crate) fn destroy_shared(&self, handle: NativeHandle, control: &Arc<SharedControl>) {
        if self.is_shut_down() {
            return;
        }
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.write();
            if !state.arbiter.take_shared(handle, control) {
                return;
            }
            // a live wrapper holds a count of its own, so normally none is found
            if let Some(wrapper) = state.resolve(handle) {
                warn!("shared object {handle} released while its wrapper was alive");
                wrapper.invalidate();
                deferred.wrappers.push(wrapper);
            }
            if let Ok(Some(generation)) = state.identity.generation(handle) {
                let _ = state.identity.begin_destruction(handle, generation);
            }
        }
        drop(deferred);
        debug!("last shared reference to {handle} released; destroying native object");
        self.shared.runtime.destroy(handle);
        self.on_native_destroyed(handle);
    }

    /// Native destruction notification.
    ///
    /// Invalidates the wrapper of `handle` and of every object it owns,
    /// parents before children, and disconnects their connections. Repeated
    /// notifications for the same object are ignored.
    pub fn notify_destroyed(&self, handle: NativeHandle) {
        self.on_native_destroyed(handle);
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn on_native_destroyed(&self, root: NativeHandle) -> usize {
        let mut deferred = Deferred::default();
        let invalidated = {
            let mut state = self.shared.state.write();
            // an unregistered owner still has to take its children with it
            if state.identity.is_retired(root) && !state.arbiter.is_related(root) {
                trace!("destruction of {root} already handled");
                return 0;
            }

            let mut invalidated = 0;
            for handle in state.arbiter.descendants(root) {
                let released = state.connections.on_endpoint_destroyed(handle);
                deferred.callables.extend(released);
                if let Some(wrapper) = state.resolve(handle) {
                    wrapper.invalidate();
                    invalidated += 1;
                    deferred.wrappers.push(wrapper);
                }
                state.identity.retire(handle);
                deferred.wrappers.extend(state.arbiter.remove(handle));
            }
            invalidated
        };
        if invalidated > 0 || !deferred.callables.is_empty() {
            debug!(
                "destruction of {root}: {invalidated} wrapper(s) invalidated, {} connection(s) dropped",
                deferred.callables.len()
            );
        }
        drop(deferred);
        invalidated
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn parent_of(&self, wrapper: &Wrapper) -> Option<NativeHandle> {
        self.shared.state.read().arbiter.parent(wrapper.handle())
    }

    /// Owned objects in the order they were attached.
    pub fn children_of(&self, wrapper: &Wrapper) -> Vec<NativeHandle> {
        self.shared.state.read().arbiter.children(wrapper.handle())
    }

    /// Wrapped children of `wrapper` whose type is `type_hash` or derives
    /// from it.
    pub fn find_children(&self, wrapper: &Wrapper, type_hash: TypeHash) -> Vec<Wrapper> {
        let children: Vec<Wrapper> = {
            let state = self.shared.state.read();
            state
                .arbiter
                .children(wrapper.handle())
                .into_iter()
                .filter_map(|h| state.resolve(h))
                .collect()
        };
        let dispatch = self.shared.dispatch.read();
        let types = dispatch.types();
        let matching = children
            .iter()
            .filter(|c| types.is_subtype(c.type_hash(), type_hash))
            .cloned()
            .collect();
        drop(dispatch);
        matching
    }

    /// Snapshot of everything the bridge knows about `wrapper`.
    pub fn dump(&self, wrapper: &Wrapper) -> WrapperInfo {
        let handle = wrapper.handle();
        let state = self.shared.state.read();
        let current = matches!(
            state.identity.generation(handle),
            Ok(Some(g)) if g == wrapper.generation()
        );
        WrapperInfo {
            handle,
            type_name: wrapper.type_name().to_string(),
            generation: wrapper.generation(),
            valid: wrapper.is_valid(),
            created_by_host: wrapper.created_by_host(),
            ownership: if current {
                state.arbiter.mode(handle).cloned()
            } else {
                None
            },
            parent: state.arbiter.parent(handle),
            children: state.arbiter.children(handle),
            connections: state.connections.count_for(handle),
        }
    }

    /// Number of active connections in total.
    pub fn connection_count(&self) -> usize {
        self.shared.state.read().connections.len()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Call `operation` on `wrapper` through virtual dispatch.
    ///
    /// Arguments are checked against the declared parameters before
    /// anything runs; the result is checked against the declared return.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn invoke(&self, wrapper: &Wrapper, operation: &str, args: &[Value]) -> BridgeResult<Value> {
        Self::ensure_valid(wrapper)?;
        let chain = self
            .shared
            .dispatch
            .read()
            .chain(wrapper.type_hash(), operation)?;
        let args = ValueKind::coerce_args(chain.operation().params(), args)?;

        let _depth = DepthGuard::enter(self.shared.config.max_dispatch_depth)?;
        trace!("invoke {}::{operation} on {}", chain.type_name(), wrapper.handle());
        let result = self.run_target(&chain, 0, wrapper, &args)?;
        Ok(chain.operation().returns().coerce(result)?)
    }

    /// Native code is about to run a virtual operation on `handle`.
    ///
    /// Runs the host override if one applies. Native code runs its own
    /// implementation when the answer is `UseNativeDefault`: the object has
    /// no live wrapper, or the resolved implementation is native.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn request_virtual_dispatch(
        &self,
        handle: NativeHandle,
        operation: &str,
        args: &[Value],
    ) -> BridgeResult<VirtualDispatch> {
        let Some(wrapper) = self.resolve(handle) else {
            return Ok(VirtualDispatch::UseNativeDefault);
        };
        if !wrapper.is_valid() {
            return Ok(VirtualDispatch::UseNativeDefault);
        }
        let chain = self
            .shared
            .dispatch
            .read()
            .chain(wrapper.type_hash(), operation)?;
        if !chain.head().is_host() {
            return Ok(VirtualDispatch::UseNativeDefault);
        }

        let args = ValueKind::coerce_args(chain.operation().params(), args)?;
        let _depth = DepthGuard::enter(self.shared.config.max_dispatch_depth)?;
        trace!("native virtual call {}::{operation} on {handle} routed to host", chain.type_name());
        let result = self.run_target(&chain, 0, &wrapper, &args)?;
        Ok(VirtualDispatch::Handled(
            chain.operation().returns().coerce(result)?,
        ))
    }

    // `call_super` support: run the implementation at `position`.
    pub(crate) fn call_next(
        &self,
        chain: &DispatchChain,
        position: usize,
        this: &Wrapper,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let args = ValueKind::coerce_args(chain.operation().params(), args)?;
        let result = self.run_target(chain, position, this, &args)?;
        Ok(chain.operation().returns().coerce(result)?)
    }

    fn run_target(
        &self,
        chain: &DispatchChain,
        position: usize,
        this: &Wrapper,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let operation = chain.operation().name();
        let Some(target) = chain.targets().get(position) else {
            return Err(BridgeError::NoSuperCall {
                context: operation.to_string(),
            });
        };

        match target {
            Target::HostOverride { callable, .. } => {
                let frame = CallFrame::new(
                    self,
                    Some(this),
                    args,
                    CallSite::Dispatch { chain, position },
                );
                Ok(callable.call(&frame)?)
            }
            Target::NativeDefault { declared_in } => {
                // an override may have destroyed the object
                Self::ensure_valid(this)?;
                let call = NativeCall {
                    handle: this.handle(),
                    declared_in: *declared_in,
                    type_name: chain.native_name(),
                    operation,
                    args,
                };
                Ok(self.shared.runtime.call_default(call)?)
            }
            Target::Pure { .. } => Err(BridgeError::PureVirtualCall {
                type_name: chain.native_name().to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    fn signal_decl(&self, type_hash: TypeHash, signal: &str) -> BridgeResult<SignalDecl> {
        let dispatch = self.shared.dispatch.read();
        let types = dispatch.types();
        let descriptor = types
            .get(type_hash)
            .ok_or(BridgeError::TypeNotRegistered(type_hash))?;
        types
            .find_signal(type_hash, TypeHash::from_signal(signal))
            .map(|(_, decl)| decl.clone())
            .ok_or_else(|| BridgeError::UnknownSignal {
                type_name: descriptor.name().to_string(),
                signal: signal.to_string(),
            })
    }

    /// Subscribe `callable` to `signal` of `source`.
    pub fn connect(&self, source: &Wrapper, signal: &str, callable: HostFn) -> BridgeResult<Connection> {
        self.connect_inner(source, signal, None, callable)
    }

    /// Subscribe `callable` on behalf of `receiver`.
    ///
    /// The connection ends when either object is destroyed, and the
    /// receiver is passed as `this` on delivery.
    pub fn connect_to(
        &self,
        source: &Wrapper,
        signal: &str,
        receiver: &Wrapper,
        callable: HostFn,
    ) -> BridgeResult<Connection> {
        Self::ensure_valid(receiver)?;
        self.connect_inner(source, signal, Some(receiver), callable)
    }

    fn connect_inner(
        &self,
        source: &Wrapper,
        signal: &str,
        receiver: Option<&Wrapper>,
        callable: HostFn,
    ) -> BridgeResult<Connection> {
        self.ensure_running()?;
        let handle = source.handle();
        if !source.is_valid() {
            return Err(BridgeError::InvalidSource(handle));
        }
        let decl = self.signal_decl(source.type_hash(), signal)?;

        let connection = {
            let mut state = self.shared.state.write();
            // validity only changes under this lock
            if !source.is_valid() || state.identity.is_destroying(handle) {
                return Err(BridgeError::InvalidSource(handle));
            }
            if let Some(receiver) = receiver
                && (!receiver.is_valid() || state.identity.is_destroying(receiver.handle()))
            {
                return Err(BridgeError::UseAfterFree(receiver.handle()));
            }
            state.connections.connect(
                handle,
                source.type_hash(),
                decl.hash(),
                receiver.map(Wrapper::handle),
                callable,
            )
        };
        debug!("connected {} to {handle}.{signal}", connection.id());
        Ok(connection)
    }

    /// End a connection. Ending it again does nothing.
    pub fn disconnect(&self, connection: &Connection) {
        let released = self.shared.state.write().connections.disconnect(connection.id());
        if released.is_some() {
            debug!("disconnected {}", connection.id());
        }
        drop(released);
    }

    /// End every connection of `callable` to `signal` of `source`.
    ///
    /// Returns how many were ended.
    pub fn disconnect_callable(&self, source: &Wrapper, signal: &str, callable: &HostFn) -> usize {
        let released = self.shared.state.write().connections.disconnect_callable(
            source.handle(),
            TypeHash::from_signal(signal),
            callable,
        );
        let count = released.len();
        drop(released);
        count
    }

    /// Raise `signal` on `source` from host code.
    ///
    /// Returns the number of connections delivered to.
    pub fn emit(&self, source: &Wrapper, signal: &str, args: &[Value]) -> BridgeResult<usize> {
        if !source.is_valid() {
            return Err(BridgeError::InvalidSource(source.handle()));
        }
        self.emit_from(source.handle(), source.type_hash(), signal, args)
    }

    /// A native object raised `signal`.
    ///
    /// Objects whose wrapper was collected still deliver to their
    /// connections; objects that never had a connection deliver nothing.
    pub fn notify_signal(&self, handle: NativeHandle, signal: &str, args: &[Value]) -> BridgeResult<usize> {
        let (wrapper, recorded) = {
            let state = self.shared.state.read();
            if state.identity.is_retired(handle) {
                return Err(BridgeError::StaleHandle(handle));
            }
            (state.resolve(handle), state.connections.source_type(handle))
        };
        let type_hash = wrapper.as_ref().map(Wrapper::type_hash).or(recorded);
        drop(wrapper);
        match type_hash {
            Some(type_hash) => self.emit_from(handle, type_hash, signal, args),
            None => Ok(0),
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn emit_from(
        &self,
        handle: NativeHandle,
        type_hash: TypeHash,
        signal: &str,
        args: &[Value],
    ) -> BridgeResult<usize> {
        let decl = self.signal_decl(type_hash, signal)?;
        let args = ValueKind::coerce_args(decl.params(), args)?;

        let deliveries: Vec<_> = {
            let state = self.shared.state.read();
            state
                .connections
                .snapshot(handle, decl.hash())
                .into_iter()
                .map(|d| {
                    let receiver = d.receiver.and_then(|r| state.resolve(r));
                    (d, receiver)
                })
                .collect()
        };

        let mut delivered = 0;
        let mut failures = Vec::new();
        for (delivery, receiver) in &deliveries {
            // an earlier slot may have disconnected this one
            if !delivery.connection.is_active() {
                continue;
            }
            delivered += 1;
            let frame = CallFrame::new(
                self,
                receiver.as_ref(),
                &args,
                CallSite::Slot { signal },
            );
            if let Err(error) = delivery.callable.call(&frame) {
                warn!(
                    "slot {} failed during '{signal}' on {handle}: {error}",
                    delivery.connection.id()
                );
                failures.push(SlotFailure {
                    connection: delivery.connection.id(),
                    error,
                });
            }
        }
        drop(deliveries);

        trace!("emitted '{signal}' on {handle} to {delivered} slot(s)");
        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(EmitError {
                signal: signal.to_string(),
                delivered,
                failures,
            }
            .into())
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Tear the bridge down.
    ///
    /// Every object is handed to native code, keep-alive references and
    /// connections are released, and host collection stops destroying
    /// anything. Wrapping and connecting fail with `ShutDown` afterwards.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.write();
            deferred.wrappers = state.arbiter.shutdown();
            deferred.callables = state.connections.clear();
            state.identity.clear_retired();
        }
        debug!(
            "bridge shut down: released {} keep-alive reference(s), {} connection(s)",
            deferred.wrappers.len(),
            deferred.callables.len()
        );
        drop(deferred);
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.shared.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
