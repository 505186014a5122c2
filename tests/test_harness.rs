// tests/test_harness.rs
//! Shared fixtures for the bridge integration tests.
//!
//! Provides a recording native runtime and a small native hierarchy:
//!
//! ```text
//! Object   name() -> string (virtual), id() -> int, signal destroyed()
//!   Widget paint(int) -> int (virtual), size_hint() -> int (pure),
//!          signal clicked(bool), signal moved(int, int)
//!     Button label() -> string (virtual)
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use objbridge::*;
use parking_lot::Mutex;

/// Shorthand for a non-null handle.
pub fn h(addr: usize) -> NativeHandle {
    NativeHandle::from_addr(addr).expect("test handles are non-null")
}

/// A native default call the runtime served.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub handle: NativeHandle,
    pub type_name: String,
    pub operation: String,
    pub args: Vec<Value>,
}

/// Native runtime that records everything the bridge asks of it.
#[derive(Default)]
pub struct RecordingRuntime {
    destroyed: Mutex<Vec<NativeHandle>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingRuntime {
    pub fn destroyed(&self) -> Vec<NativeHandle> {
        self.destroyed.lock().clone()
    }

    pub fn destroy_count(&self, handle: NativeHandle) -> usize {
        self.destroyed.lock().iter().filter(|d| **d == handle).count()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

impl NativeRuntime for RecordingRuntime {
    fn call_default(&self, call: NativeCall<'_>) -> Result<Value, NativeError> {
        self.calls.lock().push(RecordedCall {
            handle: call.handle,
            type_name: call.type_name.to_string(),
            operation: call.operation.to_string(),
            args: call.args.to_vec(),
        });
        match call.operation {
            "name" => Ok(Value::String(call.type_name.to_string())),
            "id" => Ok(Value::Int(call.handle.addr() as i64)),
            "paint" => match call.args.first() {
                Some(Value::Int(v)) => Ok(Value::Int(v + 1)),
                _ => Err(NativeError::new("paint expects an int")),
            },
            "label" => Ok(Value::String("native label".into())),
            other => Err(NativeError::new(format!("no native implementation of {other}"))),
        }
    }

    fn destroy(&self, handle: NativeHandle) {
        self.destroyed.lock().push(handle);
    }
}

/// A bridge with the standard hierarchy registered.
pub struct Fixture {
    pub bridge: Bridge,
    pub runtime: Arc<RecordingRuntime>,
    pub object: TypeHash,
    pub widget: TypeHash,
    pub button: TypeHash,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let runtime = Arc::new(RecordingRuntime::default());
        let bridge = Bridge::with_config(runtime.clone(), config);

        let object = bridge
            .register_native_type(
                TypeDescriptor::native("Object")
                    .with_operation(OperationDecl::virtual_op("name", [], ValueKind::String))
                    .with_operation(OperationDecl::new("id", [], ValueKind::Int))
                    .with_signal(SignalDecl::new("destroyed", [])),
            )
            .expect("Object registers");
        let widget = bridge
            .register_native_type(
                TypeDescriptor::native("Widget")
                    .with_base("Object")
                    .with_operation(OperationDecl::virtual_op(
                        "paint",
                        [ValueKind::Int],
                        ValueKind::Int,
                    ))
                    .with_operation(OperationDecl::pure_virtual("size_hint", [], ValueKind::Int))
                    .with_signal(SignalDecl::new("clicked", [ValueKind::Bool]))
                    .with_signal(SignalDecl::new("moved", [ValueKind::Int, ValueKind::Int])),
            )
            .expect("Widget registers");
        let button = bridge
            .register_native_type(
                TypeDescriptor::native("Button")
                    .with_base("Widget")
                    .with_operation(OperationDecl::virtual_op("label", [], ValueKind::String)),
            )
            .expect("Button registers");

        Self {
            bridge,
            runtime,
            object,
            widget,
            button,
        }
    }

    /// Wrap `addr` as a native-owned `Widget`.
    pub fn native_widget(&self, addr: usize) -> Wrapper {
        self.bridge
            .wrap(h(addr), self.widget, Ownership::Native)
            .expect("wrap succeeds")
    }

    /// Wrap `addr` as a `Widget` owned by `parent`.
    pub fn child_widget(&self, addr: usize, parent: usize) -> Wrapper {
        self.bridge
            .wrap(h(addr), self.widget, Ownership::Parent(h(parent)))
            .expect("wrap succeeds")
    }
}

/// A callable returning a constant.
pub fn returning(value: Value) -> HostFn {
    HostFn::new(move |_| Ok(value.clone()))
}
