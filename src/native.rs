//! The native side of the bridge.
//!
//! The bridge never touches native memory itself. Whenever a native default
//! implementation must run, or a native object must be destroyed, it asks
//! the embedder's [`NativeRuntime`].

use objbridge_core::{NativeError, NativeHandle, TypeHash, Value};

/// A call to a native default implementation.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall<'a> {
    /// Object the call is made on.
    pub handle: NativeHandle,
    /// Native type whose implementation must run.
    pub declared_in: TypeHash,
    /// Name of `declared_in`.
    pub type_name: &'a str,
    /// Operation name.
    pub operation: &'a str,
    /// Arguments, already checked against the declared parameter kinds.
    pub args: &'a [Value],
}

/// Services the native object system provides to the bridge.
///
/// Both methods may be called from any thread, but never while the bridge
/// holds one of its locks, so implementations are free to call back into
/// the bridge (for example `notify_destroyed` for each destroyed child, or
/// `notify_signal` for a `destroyed` notification).
pub trait NativeRuntime: Send + Sync {
    /// Run the implementation of `call.operation` declared in
    /// `call.declared_in`, bypassing virtual dispatch.
    fn call_default(&self, call: NativeCall<'_>) -> Result<Value, NativeError>;

    /// Destroy the native object. Native children are destroyed with it.
    fn destroy(&self, handle: NativeHandle);
}
