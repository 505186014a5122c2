//! Host callables and host subclasses.
//!
//! A [`HostFn`] is a closure supplied by host code. It is used both as a
//! virtual-method override and as a signal slot, and receives a
//! [`CallFrame`] describing the call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use objbridge_core::{
    BridgeError, BridgeResult, ConversionError, FromValue, HostError, SignalDecl, TypeDescriptor,
    Value,
};

use crate::Bridge;
use crate::dispatch::DispatchChain;
use crate::wrapper::Wrapper;

type HostFnInner = dyn Fn(&CallFrame<'_>) -> Result<Value, HostError> + Send + Sync;

static NEXT_HOST_FN_ID: AtomicU64 = AtomicU64::new(1);

/// A host-supplied callable.
///
/// Cloning is cheap and keeps the identity: two clones compare equal, two
/// separately created callables never do, even when built from the same
/// closure.
#[derive(Clone)]
pub struct HostFn {
    id: u64,
    func: Arc<HostFnInner>,
}

impl HostFn {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CallFrame<'_>) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_HOST_FN_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(f),
        }
    }

    /// Identity of the callable.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Invoke the callable.
    pub fn call(&self, frame: &CallFrame<'_>) -> Result<Value, HostError> {
        (self.func)(frame)
    }

    /// Number of live clones, registry references included.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.func)
    }
}

impl PartialEq for HostFn {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostFn {}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn#{}", self.id)
    }
}

pub(crate) enum CallSite<'a> {
    Dispatch {
        chain: &'a DispatchChain,
        position: usize,
    },
    Slot {
        signal: &'a str,
    },
}

/// Everything a host callable sees about the call it is serving.
pub struct CallFrame<'a> {
    bridge: &'a Bridge,
    this: Option<&'a Wrapper>,
    args: &'a [Value],
    site: CallSite<'a>,
}

impl<'a> CallFrame<'a> {
    pub(crate) fn new(
        bridge: &'a Bridge,
        this: Option<&'a Wrapper>,
        args: &'a [Value],
        site: CallSite<'a>,
    ) -> Self {
        Self {
            bridge,
            this,
            args,
            site,
        }
    }

    /// The bridge the call runs on; use it to re-enter.
    pub fn bridge(&self) -> &'a Bridge {
        self.bridge
    }

    /// The object the call is made on.
    ///
    /// Always set for overrides. For slots it is the receiver of a
    /// `connect_to` connection, if it is still alive.
    pub fn this(&self) -> Option<&'a Wrapper> {
        self.this
    }

    /// Marshalled arguments.
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    /// Convert argument `index`.
    pub fn arg<T: FromValue>(&self, index: usize) -> Result<T, HostError> {
        let value = self.args.get(index).ok_or(ConversionError::ArityMismatch {
            expected: index + 1,
            actual: self.args.len(),
        })?;
        Ok(T::from_value(value)?)
    }

    /// Operation or signal name the callable is serving.
    pub fn name(&self) -> &str {
        match &self.site {
            CallSite::Dispatch { chain, .. } => chain.operation().name(),
            CallSite::Slot { signal } => signal,
        }
    }

    /// Call the next implementation of this operation after the override
    /// that is running, in method resolution order.
    ///
    /// # Errors
    ///
    /// `NoSuperCall` when called from a slot, and whatever the next
    /// implementation fails with.
    pub fn call_super(&self, args: &[Value]) -> BridgeResult<Value> {
        match (&self.site, self.this) {
            (CallSite::Dispatch { chain, position }, Some(this)) => {
                self.bridge.call_next(chain, *position + 1, this, args)
            }
            _ => Err(BridgeError::NoSuperCall {
                context: self.name().to_string(),
            }),
        }
    }
}

/// A subclass of native types implemented in host code.
///
/// ```
/// use objbridge::{HostClass, HostFn, Value};
///
/// let class = HostClass::new("MyTimer")
///     .with_base("Timer")
///     .with_override("interval", HostFn::new(|_| Ok(Value::Int(250))));
/// assert_eq!(class.descriptor().bases(), ["Timer"]);
/// ```
#[derive(Debug, Clone)]
pub struct HostClass {
    descriptor: TypeDescriptor,
    overrides: Vec<(String, HostFn)>,
}

impl HostClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: TypeDescriptor::host(name),
            overrides: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_base(base);
        self
    }

    /// Declare a signal only host code raises.
    pub fn with_signal(mut self, signal: SignalDecl) -> Self {
        self.descriptor = self.descriptor.with_signal(signal);
        self
    }

    /// Override an inherited virtual operation.
    pub fn with_override(mut self, operation: impl Into<String>, callable: HostFn) -> Self {
        self.overrides.push((operation.into(), callable));
        self
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn overrides(&self) -> &[(String, HostFn)] {
        &self.overrides
    }

    pub(crate) fn into_parts(self) -> (TypeDescriptor, Vec<(String, HostFn)>) {
        (self.descriptor, self.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_fn_identity() {
        let a = HostFn::new(|_| Ok(Value::Void));
        let b = HostFn::new(|_| Ok(Value::Void));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.strong_count(), 1);
    }

    #[test]
    fn host_class_collects_overrides() {
        let class = HostClass::new("Mine")
            .with_base("Object")
            .with_override("event", HostFn::new(|_| Ok(Value::Bool(true))));
        assert!(class.descriptor().is_host());
        assert_eq!(class.overrides().len(), 1);
        assert_eq!(class.overrides()[0].0, "event");
    }
}
