//! Type descriptors: positions in the class hierarchy.
//!
//! A [`TypeDescriptor`] names a class, its ordered direct bases, and the
//! operations and signals it declares. Native types declare operations;
//! host types (subclasses defined in host code) only add overrides and
//! signals on top of native bases.
//!
//! ```
//! use objbridge_core::{OperationDecl, SignalDecl, TypeDescriptor, ValueKind};
//!
//! let object = TypeDescriptor::native("Object")
//!     .with_operation(OperationDecl::virtual_op("event", [ValueKind::Int], ValueKind::Bool))
//!     .with_signal(SignalDecl::new("destroyed", [ValueKind::NullableObject]));
//! let timer = TypeDescriptor::native("Timer").with_base("Object");
//!
//! assert!(object.operation("event").unwrap().is_virtual());
//! assert_eq!(timer.bases(), ["Object"]);
//! ```

use bitflags::bitflags;

use crate::{TypeHash, ValueKind};

bitflags! {
    /// Properties of a declared operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OperationFlags: u8 {
        /// Host subclasses may override the operation.
        const VIRTUAL = 0b0001;
        /// No native implementation exists; calling it without an override fails.
        const PURE = 0b0010;
        /// The operation does not mutate the object.
        const CONST = 0b0100;
    }
}

/// Where a type is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeOrigin {
    /// Part of the native class system.
    Native,
    /// A subclass defined in host code.
    Host,
}

/// A declared operation and its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDecl {
    name: String,
    hash: TypeHash,
    flags: OperationFlags,
    params: Vec<ValueKind>,
    returns: ValueKind,
}

impl OperationDecl {
    /// Declare a non-virtual operation.
    pub fn new(
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValueKind>,
        returns: ValueKind,
    ) -> Self {
        let name = name.into();
        Self {
            hash: TypeHash::from_operation(&name),
            name,
            flags: OperationFlags::empty(),
            params: params.into_iter().collect(),
            returns,
        }
    }

    /// Declare a virtual operation.
    pub fn virtual_op(
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValueKind>,
        returns: ValueKind,
    ) -> Self {
        Self::new(name, params, returns).with_flags(OperationFlags::VIRTUAL)
    }

    /// Declare a pure virtual operation.
    pub fn pure_virtual(
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValueKind>,
        returns: ValueKind,
    ) -> Self {
        Self::new(name, params, returns).with_flags(OperationFlags::VIRTUAL | OperationFlags::PURE)
    }

    /// Add flags. `PURE` implies `VIRTUAL`.
    pub fn with_flags(mut self, flags: OperationFlags) -> Self {
        self.flags |= flags;
        if self.flags.contains(OperationFlags::PURE) {
            self.flags |= OperationFlags::VIRTUAL;
        }
        self
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation hash.
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    /// Operation flags.
    pub fn flags(&self) -> OperationFlags {
        self.flags
    }

    /// Whether host subclasses may override it.
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(OperationFlags::VIRTUAL)
    }

    /// Whether it lacks a native implementation.
    pub fn is_pure(&self) -> bool {
        self.flags.contains(OperationFlags::PURE)
    }

    /// Parameter kinds.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    /// Return kind.
    pub fn returns(&self) -> &ValueKind {
        &self.returns
    }
}

/// A declared signal and its argument kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDecl {
    name: String,
    hash: TypeHash,
    params: Vec<ValueKind>,
}

impl SignalDecl {
    /// Declare a signal.
    pub fn new(name: impl Into<String>, params: impl IntoIterator<Item = ValueKind>) -> Self {
        let name = name.into();
        Self {
            hash: TypeHash::from_signal(&name),
            name,
            params: params.into_iter().collect(),
        }
    }

    /// Signal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal hash.
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    /// Argument kinds.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }
}

/// A registered position in the class hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    hash: TypeHash,
    origin: TypeOrigin,
    bases: Vec<String>,
    operations: Vec<OperationDecl>,
    signals: Vec<SignalDecl>,
}

impl TypeDescriptor {
    fn with_origin(name: impl Into<String>, origin: TypeOrigin) -> Self {
        let name = name.into();
        Self {
            hash: TypeHash::from_name(&name),
            name,
            origin,
            bases: Vec::new(),
            operations: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Describe a native class.
    pub fn native(name: impl Into<String>) -> Self {
        Self::with_origin(name, TypeOrigin::Native)
    }

    /// Describe a host subclass.
    pub fn host(name: impl Into<String>) -> Self {
        Self::with_origin(name, TypeOrigin::Host)
    }

    /// Append a direct base. Order matters for method resolution.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    /// Declare an operation.
    pub fn with_operation(mut self, op: OperationDecl) -> Self {
        self.operations.push(op);
        self
    }

    /// Declare a signal.
    pub fn with_signal(mut self, signal: SignalDecl) -> Self {
        self.signals.push(signal);
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type hash.
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    /// Native or host.
    pub fn origin(&self) -> TypeOrigin {
        self.origin
    }

    /// Whether the type is implemented in host code.
    pub fn is_host(&self) -> bool {
        self.origin == TypeOrigin::Host
    }

    /// Direct base names in declaration order.
    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// Operations declared on this type (not inherited ones).
    pub fn operations(&self) -> &[OperationDecl] {
        &self.operations
    }

    /// Signals declared on this type (not inherited ones).
    pub fn signals(&self) -> &[SignalDecl] {
        &self.signals
    }

    /// Find an operation declared on this type by name.
    pub fn operation(&self, name: &str) -> Option<&OperationDecl> {
        let hash = TypeHash::from_operation(name);
        self.operations.iter().find(|op| op.hash == hash)
    }

    /// Find an operation declared on this type by hash.
    pub fn operation_by_hash(&self, hash: TypeHash) -> Option<&OperationDecl> {
        self.operations.iter().find(|op| op.hash == hash)
    }

    /// Find a signal declared on this type by hash.
    pub fn signal_by_hash(&self, hash: TypeHash) -> Option<&SignalDecl> {
        self.signals.iter().find(|s| s.hash == hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_implies_virtual() {
        let op = OperationDecl::new("paint", [], ValueKind::Void).with_flags(OperationFlags::PURE);
        assert!(op.is_virtual());
        assert!(op.is_pure());
    }

    #[test]
    fn lookup_declared_members() {
        let ty = TypeDescriptor::native("Widget")
            .with_operation(OperationDecl::new("show", [], ValueKind::Void))
            .with_signal(SignalDecl::new("clicked", [ValueKind::Bool]));
        assert!(ty.operation("show").is_some());
        assert!(ty.operation("hide").is_none());
        assert_eq!(
            ty.signal_by_hash(TypeHash::from_signal("clicked")).map(|s| s.params().len()),
            Some(1)
        );
        assert_eq!(ty.hash(), TypeHash::from_name("Widget"));
    }

    #[test]
    fn host_origin() {
        assert!(TypeDescriptor::host("MyWidget").is_host());
        assert!(!TypeDescriptor::native("Widget").is_host());
    }
}
