//! Core types for the objbridge runtime.
//!
//! This crate holds everything the registries and the bridge share but that
//! carries no behaviour of its own:
//!
//! - [`NativeHandle`] and [`Generation`]: identity of native instances
//! - [`TypeHash`]: deterministic identity of types, operations and signals
//! - [`Value`], [`ValueKind`], [`FromValue`], [`IntoValue`]: the conversion layer
//! - [`TypeDescriptor`], [`OperationDecl`], [`SignalDecl`]: class hierarchy metadata
//! - the error hierarchy rooted at [`BridgeError`]

pub mod convert;
pub mod error;
pub mod handle;
pub mod type_def;
pub mod type_hash;
pub mod value;

pub use convert::{FromValue, IntoValue};
pub use error::{
    BridgeError, BridgeResult, ConnectionId, ConversionError, EmitError, HostError, NativeError,
    RegistrationError, ReparentReason, SlotFailure,
};
pub use handle::{Generation, NativeHandle};
pub use type_def::{OperationDecl, OperationFlags, SignalDecl, TypeDescriptor, TypeOrigin};
pub use type_hash::TypeHash;
pub use value::{Value, ValueKind};
