//! Signal/slot connections.
//!
//! A connection subscribes a host callable to one signal of one source
//! object. The registry holds the callable for exactly as long as the
//! connection is active and refers to both endpoints by handle only, so a
//! connection never keeps an object or its wrapper alive.
//!
//! Connection state lives in an atomic shared with every [`Connection`]
//! value handed out, so a fan-out in progress notices a disconnect made by
//! an earlier slot without taking a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use objbridge_core::{ConnectionId, NativeHandle, TypeHash};
use rustc_hash::FxHashMap;

use crate::callable::HostFn;

/// Lifecycle of a connection. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConnectionState {
    Active = 0,
    Disconnected = 1,
}

/// Handle to one subscription.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    state: Arc<AtomicU8>,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(ConnectionState::Active.into())),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    fn mark_disconnected(&self) {
        self.state
            .store(ConnectionState::Disconnected.into(), Ordering::Release);
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

#[derive(Debug)]
struct Slot {
    connection: Connection,
    signal: TypeHash,
    receiver: Option<NativeHandle>,
    callable: HostFn,
}

#[derive(Debug)]
struct SourceEntry {
    type_hash: TypeHash,
    slots: Vec<Slot>,
}

/// One pending delivery, captured under the lock and run outside it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub connection: Connection,
    pub receiver: Option<NativeHandle>,
    pub callable: HostFn,
}

/// All active connections, by source.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sources: FxHashMap<NativeHandle, SourceEntry>,
    by_id: FxHashMap<ConnectionId, NativeHandle>,
    by_receiver: FxHashMap<NativeHandle, Vec<ConnectionId>>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callable` to `signal` of `source`.
    ///
    /// `source_type` is remembered so the source's signals can still be
    /// validated after its wrapper was collected.
    pub fn connect(
        &mut self,
        source: NativeHandle,
        source_type: TypeHash,
        signal: TypeHash,
        receiver: Option<NativeHandle>,
        callable: HostFn,
    ) -> Connection {
        self.next_id += 1;
        let connection = Connection::new(ConnectionId(self.next_id));

        self.sources
            .entry(source)
            .or_insert_with(|| SourceEntry {
                type_hash: source_type,
                slots: Vec::new(),
            })
            .slots
            .push(Slot {
                connection: connection.clone(),
                signal,
                receiver,
                callable,
            });
        self.by_id.insert(connection.id, source);
        if let Some(receiver) = receiver {
            self.by_receiver
                .entry(receiver)
                .or_default()
                .push(connection.id);
        }
        connection
    }

    fn detach(&mut self, source: NativeHandle, index: usize) -> Option<HostFn> {
        let entry = self.sources.get_mut(&source)?;
        let slot = entry.slots.remove(index);
        if entry.slots.is_empty() {
            self.sources.remove(&source);
        }
        self.by_id.remove(&slot.connection.id);
        if let Some(receiver) = slot.receiver {
            self.unlink_receiver(receiver, slot.connection.id);
        }
        slot.connection.mark_disconnected();
        Some(slot.callable)
    }

    fn unlink_receiver(&mut self, receiver: NativeHandle, id: ConnectionId) {
        if let Some(ids) = self.by_receiver.get_mut(&receiver) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.by_receiver.remove(&receiver);
            }
        }
    }

    /// Disconnect one connection. Disconnecting twice is a no-op.
    ///
    /// Returns the released callable.
    pub fn disconnect(&mut self, id: ConnectionId) -> Option<HostFn> {
        let source = *self.by_id.get(&id)?;
        let index = self
            .sources
            .get(&source)?
            .slots
            .iter()
            .position(|s| s.connection.id == id)?;
        self.detach(source, index)
    }

    /// Disconnect every connection of `callable` to `signal` of `source`.
    pub fn disconnect_callable(
        &mut self,
        source: NativeHandle,
        signal: TypeHash,
        callable: &HostFn,
    ) -> Vec<HostFn> {
        let ids: Vec<ConnectionId> = match self.sources.get(&source) {
            Some(entry) => entry
                .slots
                .iter()
                .filter(|s| s.signal == signal && s.callable == *callable)
                .map(|s| s.connection.id)
                .collect(),
            None => return Vec::new(),
        };
        ids.into_iter()
            .filter_map(|id| self.disconnect(id))
            .collect()
    }

    /// Disconnect everything with `handle` as source or receiver.
    ///
    /// Returns the released callables.
    pub fn on_endpoint_destroyed(&mut self, handle: NativeHandle) -> Vec<HostFn> {
        let mut released = Vec::new();

        if let Some(entry) = self.sources.remove(&handle) {
            for slot in entry.slots {
                self.by_id.remove(&slot.connection.id);
                if let Some(receiver) = slot.receiver {
                    self.unlink_receiver(receiver, slot.connection.id);
                }
                slot.connection.mark_disconnected();
                released.push(slot.callable);
            }
        }

        if let Some(ids) = self.by_receiver.remove(&handle) {
            for id in ids {
                released.extend(self.disconnect(id));
            }
        }

        released
    }

    /// Active connections of `signal` on `source`, in registration order.
    pub fn snapshot(&self, source: NativeHandle, signal: TypeHash) -> Vec<Delivery> {
        self.sources
            .get(&source)
            .map(|entry| {
                entry
                    .slots
                    .iter()
                    .filter(|s| s.signal == signal)
                    .map(|s| Delivery {
                        connection: s.connection.clone(),
                        receiver: s.receiver,
                        callable: s.callable.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Type recorded for `source` when its first connection was made.
    pub fn source_type(&self, source: NativeHandle) -> Option<TypeHash> {
        self.sources.get(&source).map(|e| e.type_hash)
    }

    /// Active connections with `source` as source.
    pub fn count_for(&self, source: NativeHandle) -> usize {
        self.sources.get(&source).map_or(0, |e| e.slots.len())
    }

    /// Active connections in total.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Disconnect everything.
    pub fn clear(&mut self) -> Vec<HostFn> {
        self.by_id.clear();
        self.by_receiver.clear();
        self.sources
            .drain()
            .flat_map(|(_, entry)| entry.slots)
            .map(|slot| {
                slot.connection.mark_disconnected();
                slot.callable
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_core::Value;

    fn h(addr: usize) -> NativeHandle {
        NativeHandle::from_addr(addr).unwrap()
    }

    fn noop() -> HostFn {
        HostFn::new(|_| Ok(Value::Void))
    }

    fn sig(name: &str) -> TypeHash {
        TypeHash::from_signal(name)
    }

    fn obj() -> TypeHash {
        TypeHash::from_name("Object")
    }

    #[test]
    fn snapshot_keeps_registration_order() {
        let mut registry = ConnectionRegistry::new();
        let a = noop();
        let b = noop();
        registry.connect(h(1), obj(), sig("clicked"), None, a.clone());
        registry.connect(h(1), obj(), sig("toggled"), None, noop());
        registry.connect(h(1), obj(), sig("clicked"), None, b.clone());

        let deliveries = registry.snapshot(h(1), sig("clicked"));
        let callables: Vec<_> = deliveries.iter().map(|d| d.callable.clone()).collect();
        assert_eq!(callables, vec![a, b]);
    }

    #[test]
    fn disconnect_is_idempotent_and_releases_callable() {
        let mut registry = ConnectionRegistry::new();
        let callable = noop();
        let connection = registry.connect(h(1), obj(), sig("clicked"), None, callable.clone());
        assert_eq!(callable.strong_count(), 2);

        let released = registry.disconnect(connection.id());
        assert!(released.is_some());
        drop(released);
        assert_eq!(callable.strong_count(), 1);
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        assert!(registry.disconnect(connection.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn source_destruction_disconnects_all() {
        let mut registry = ConnectionRegistry::new();
        let connections: Vec<_> = (0..10)
            .map(|_| registry.connect(h(1), obj(), sig("clicked"), Some(h(2)), noop()))
            .collect();

        assert_eq!(registry.on_endpoint_destroyed(h(1)).len(), 10);
        assert!(connections.iter().all(|c| !c.is_active()));
        assert!(registry.is_empty());
        // receiver index was cleaned as well
        assert!(registry.on_endpoint_destroyed(h(2)).is_empty());
    }

    #[test]
    fn receiver_destruction_disconnects_its_connections() {
        let mut registry = ConnectionRegistry::new();
        let to_receiver = registry.connect(h(1), obj(), sig("clicked"), Some(h(2)), noop());
        let plain = registry.connect(h(1), obj(), sig("clicked"), None, noop());

        assert_eq!(registry.on_endpoint_destroyed(h(2)).len(), 1);
        assert!(!to_receiver.is_active());
        assert!(plain.is_active());
        assert_eq!(registry.count_for(h(1)), 1);
    }

    #[test]
    fn disconnect_callable_matches_identity_and_signal() {
        let mut registry = ConnectionRegistry::new();
        let target = noop();
        registry.connect(h(1), obj(), sig("clicked"), None, target.clone());
        registry.connect(h(1), obj(), sig("clicked"), None, target.clone());
        registry.connect(h(1), obj(), sig("toggled"), None, target.clone());
        registry.connect(h(1), obj(), sig("clicked"), None, noop());

        assert_eq!(registry.disconnect_callable(h(1), sig("clicked"), &target).len(), 2);
        assert_eq!(registry.count_for(h(1)), 2);
    }

    #[test]
    fn source_type_dropped_with_last_connection() {
        let mut registry = ConnectionRegistry::new();
        let connection = registry.connect(h(1), obj(), sig("clicked"), None, noop());
        assert_eq!(registry.source_type(h(1)), Some(obj()));
        registry.disconnect(connection.id());
        assert_eq!(registry.source_type(h(1)), None);
    }

    #[test]
    fn state_round_trips_through_u8() {
        assert_eq!(u8::from(ConnectionState::Disconnected), 1);
        assert!(matches!(ConnectionState::try_from(0u8), Ok(ConnectionState::Active)));
        assert!(ConnectionState::try_from(7u8).is_err());
    }
}
