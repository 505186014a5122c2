//! Runtime bridge between a host language and a native object system.
//!
//! The bridge lets host code wrap, subclass and connect to objects of a
//! native class hierarchy:
//!
//! - **Identity**: one live [`Wrapper`] per native object, resolved through
//!   the identity registry.
//! - **Ownership**: every object is host-owned, native-owned, owned by a
//!   parent, or reference counted; destruction is decided by exactly one
//!   authority and cascades to owned children.
//! - **Dispatch**: host subclasses override virtual operations; native code
//!   asks the bridge before running its own implementation.
//! - **Signals**: host callables subscribe to signals of native objects and
//!   are released when either endpoint dies.
//!
//! ```
//! use std::sync::Arc;
//! use objbridge::{
//!     Bridge, HostClass, HostFn, NativeCall, NativeError, NativeHandle, NativeRuntime,
//!     OperationDecl, TypeDescriptor, Value, ValueKind,
//! };
//!
//! struct Runtime;
//!
//! impl NativeRuntime for Runtime {
//!     fn call_default(&self, _call: NativeCall<'_>) -> Result<Value, NativeError> {
//!         Ok(Value::String("native".into()))
//!     }
//!     fn destroy(&self, _handle: NativeHandle) {}
//! }
//!
//! let bridge = Bridge::new(Arc::new(Runtime));
//! bridge
//!     .register_native_type(
//!         TypeDescriptor::native("Widget")
//!             .with_operation(OperationDecl::virtual_op("label", [], ValueKind::String)),
//!     )
//!     .unwrap();
//! let fancy = bridge
//!     .register_host_type(
//!         HostClass::new("FancyWidget")
//!             .with_base("Widget")
//!             .with_override("label", HostFn::new(|_| Ok(Value::String("fancy".into())))),
//!     )
//!     .unwrap();
//!
//! let handle = NativeHandle::from_addr(0x1000).unwrap();
//! let widget = bridge.construct(handle, fancy).unwrap();
//! let label = bridge.invoke(&widget, "label", &[]).unwrap();
//! assert_eq!(label, Value::String("fancy".into()));
//! ```

pub mod bridge;
pub mod callable;
pub mod config;
pub mod dispatch;
pub mod native;
pub mod ownership;
pub mod signals;
pub mod wrapper;

pub use bridge::Bridge;
pub use callable::{CallFrame, HostClass, HostFn};
pub use config::{BridgeConfig, BridgeProperty, PropertyError};
pub use dispatch::{DispatchChain, DispatchTable, Target, VirtualDispatch};
pub use native::{NativeCall, NativeRuntime};
pub use ownership::{Ownership, OwnershipArbiter, OwnershipMode, SharedControl, SharedRef};
pub use signals::{Connection, ConnectionRegistry, ConnectionState, Delivery};
pub use wrapper::{Wrapper, WrapperInfo};

pub use objbridge_core::{
    BridgeError, BridgeResult, ConnectionId, ConversionError, EmitError, FromValue, Generation,
    HostError, IntoValue, NativeError, NativeHandle, OperationDecl, OperationFlags,
    RegistrationError, ReparentReason, SignalDecl, SlotFailure, TypeDescriptor, TypeHash,
    TypeOrigin, Value, ValueKind,
};
pub use objbridge_registry::{IdentityRegistry, Liveness, OwnershipGraph, TypeRegistry};
