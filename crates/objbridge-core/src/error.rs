//! Unified error types for the bridge.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError (top-level)
//! ├── ConversionError    - marshalling values across the boundary
//! ├── RegistrationError  - type and override registration
//! ├── NativeError        - raised by the native runtime
//! ├── HostError          - raised by a host callable
//! └── EmitError          - aggregate of per-connection emission failures
//! ```
//!
//! Identity and ownership violations (`DuplicateIdentity`,
//! `InvalidReparenting`, `OwnershipConflict`) are programming errors and are
//! always surfaced to the caller. `UseAfterFree` and `StaleHandle` are
//! recoverable at the call site.

use std::fmt;

use thiserror::Error;

use crate::{NativeHandle, TypeHash};

// ============================================================================
// Conversion Errors
// ============================================================================

/// Errors raised while marshalling a value across the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The value has a different kind than the one expected.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected kind.
        expected: String,
        /// The actual kind.
        actual: &'static str,
    },

    /// An integer value does not fit in the target type.
    #[error("integer overflow: {value} doesn't fit in {target_type}")]
    IntegerOverflow {
        /// The value that overflowed.
        value: i64,
        /// The target type.
        target_type: &'static str,
    },

    /// A null handle was passed where an object is required.
    #[error("null handle cannot be converted to {target_type}")]
    NullHandle {
        /// The type that was expected.
        target_type: &'static str,
    },

    /// Wrong number of arguments for a signature.
    #[error("expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        /// Parameter count of the signature.
        expected: usize,
        /// Number of arguments supplied.
        actual: usize,
    },

    /// An enum value belongs to a different enum type.
    #[error("enum mismatch: expected {expected}, got {actual}")]
    EnumMismatch {
        /// Expected enum type.
        expected: TypeHash,
        /// Enum type of the value.
        actual: TypeHash,
    },

    /// A conversion failed inside an element of a container.
    #[error("element {index}: {source}")]
    Element {
        /// Index of the offending element.
        index: usize,
        /// The underlying failure.
        source: Box<ConversionError>,
    },
}

// ============================================================================
// Registration Errors
// ============================================================================

/// Errors raised while registering types and host overrides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A referenced type was not found.
    #[error("type not found: {0}")]
    TypeNotFound(String),

    /// A type with this name already exists.
    #[error("duplicate type: {0}")]
    DuplicateType(String),

    /// The base list cannot be linearized (no consistent method resolution order).
    #[error("type '{type_name}': inconsistent base order, no linearization exists")]
    InconsistentHierarchy {
        /// The type being registered.
        type_name: String,
    },

    /// A type lists the same base twice.
    #[error("type '{type_name}': duplicate base '{base}'")]
    DuplicateBase {
        /// The type being registered.
        type_name: String,
        /// The repeated base.
        base: String,
    },

    /// An operation is declared twice on the same type.
    #[error("type '{type_name}': operation '{operation}' declared twice")]
    DuplicateOperation {
        /// The type being registered.
        type_name: String,
        /// The repeated operation.
        operation: String,
    },

    /// A host type overrides an operation none of its bases declare.
    #[error("type '{type_name}': no base declares operation '{operation}'")]
    UnknownOperation {
        /// The host type.
        type_name: String,
        /// The operation that was overridden.
        operation: String,
    },

    /// A host type overrides a non-virtual operation.
    #[error("type '{type_name}': operation '{operation}' is not virtual")]
    NotVirtual {
        /// The host type.
        type_name: String,
        /// The non-virtual operation.
        operation: String,
    },

    /// A host type declares operations of its own or has no native base.
    #[error("type '{type_name}': {reason}")]
    InvalidHostType {
        /// The host type.
        type_name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ============================================================================
// Native and Host Errors
// ============================================================================

/// Error raised by the native runtime (a native exception, translated).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("native error: {message}")]
pub struct NativeError {
    /// Description of the failure.
    pub message: String,
}

impl NativeError {
    /// Create a native error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised by a host callable (an override or a slot).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The host code raised an error of its own.
    #[error("{0}")]
    Raised(String),

    /// The host code failed to convert one of its arguments.
    #[error("argument conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// A bridge call made by the host code failed and was propagated.
    #[error("bridge call failed: {0}")]
    Bridge(String),
}

impl HostError {
    /// Create a host error from a message.
    pub fn raised(message: impl Into<String>) -> Self {
        HostError::Raised(message.into())
    }
}

impl From<BridgeError> for HostError {
    fn from(err: BridgeError) -> Self {
        HostError::Bridge(err.to_string())
    }
}

// ============================================================================
// Emission Errors
// ============================================================================

/// Opaque identifier of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One failed delivery during a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotFailure {
    /// The connection whose callable failed.
    pub connection: ConnectionId,
    /// What the callable raised.
    pub error: HostError,
}

/// Aggregate of every delivery failure of one emission.
///
/// Reported once, after delivery to every live connection completed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} slot(s) failed during emission of '{signal}'", .failures.len())]
pub struct EmitError {
    /// Name of the emitted signal.
    pub signal: String,
    /// Number of connections the signal was delivered to, failures included.
    pub delivered: usize,
    /// Failures in delivery order.
    pub failures: Vec<SlotFailure>,
}

// ============================================================================
// Bridge Errors
// ============================================================================

/// Why a reparenting request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparentReason {
    /// The object would become its own parent.
    SelfParent,
    /// The new parent is a descendant of the object.
    Cycle,
    /// The ancestor chain of the new parent exceeds the configured depth.
    DepthExceeded,
}

impl fmt::Display for ReparentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReparentReason::SelfParent => write!(f, "an object cannot own itself"),
            ReparentReason::Cycle => write!(f, "new parent is a descendant"),
            ReparentReason::DepthExceeded => write!(f, "ancestor chain too deep"),
        }
    }
}

/// Top-level error type returned by every bridge operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A live wrapper is already registered for this handle.
    #[error("duplicate identity: {0} already has a live wrapper")]
    DuplicateIdentity(NativeHandle),

    /// The handle was unregistered; it must be re-registered before use.
    #[error("stale handle: {0} is no longer registered")]
    StaleHandle(NativeHandle),

    /// The native object behind the wrapper has been destroyed.
    #[error("use after free: native object {0} has been destroyed")]
    UseAfterFree(NativeHandle),

    /// Reparenting would corrupt the ownership graph.
    #[error("invalid reparenting of {child} under {parent}: {reason}")]
    InvalidReparenting {
        /// The object being reparented.
        child: NativeHandle,
        /// The requested parent.
        parent: NativeHandle,
        /// Why the request was rejected.
        reason: ReparentReason,
    },

    /// A connection was requested on an invalid source.
    #[error("invalid source: {0} is not a live object")]
    InvalidSource(NativeHandle),

    /// A value could not be marshalled.
    #[error("conversion failure: {0}")]
    ConversionFailure(#[from] ConversionError),

    /// Type or override registration failed.
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// A wrapper was requested for a type that was never registered.
    #[error("type {0} is not registered")]
    TypeNotRegistered(TypeHash),

    /// No type in the wrapper's hierarchy declares the operation.
    #[error("type '{type_name}' has no operation '{operation}'")]
    UnknownOperation {
        /// Dynamic type of the wrapper.
        type_name: String,
        /// Requested operation.
        operation: String,
    },

    /// No type in the source's hierarchy declares the signal.
    #[error("type '{type_name}' has no signal '{signal}'")]
    UnknownSignal {
        /// Dynamic type of the source.
        type_name: String,
        /// Requested signal.
        signal: String,
    },

    /// A pure virtual operation was called and no host override exists.
    #[error("pure virtual method '{type_name}::{operation}' called")]
    PureVirtualCall {
        /// Type declaring the pure operation.
        type_name: String,
        /// The operation.
        operation: String,
    },

    /// A host override raised; propagated to the native caller.
    #[error("host override failed: {0}")]
    HostRaised(#[from] HostError),

    /// The native default implementation raised.
    #[error(transparent)]
    Native(#[from] NativeError),

    /// `call_super` was used outside a host override.
    #[error("no super implementation is available in '{context}'")]
    NoSuperCall {
        /// The signal or operation the callable was running for.
        context: String,
    },

    /// Re-entrant dispatch exceeded the configured depth.
    #[error("dispatch recursion limit of {limit} exceeded")]
    RecursionLimit {
        /// The configured limit.
        limit: usize,
    },

    /// The object is being destroyed; its ownership cannot change.
    #[error("destruction of {0} is in progress")]
    DestructionInProgress(NativeHandle),

    /// The requested transition conflicts with the current ownership mode.
    #[error("ownership conflict on {handle}: {reason}")]
    OwnershipConflict {
        /// The affected object.
        handle: NativeHandle,
        /// Why the transition is not allowed.
        reason: &'static str,
    },

    /// One or more slots failed during an emission.
    #[error(transparent)]
    EmitFailed(#[from] EmitError),

    /// The bridge has been shut down.
    #[error("bridge has been shut down")]
    ShutDown,
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
