//! Virtual dispatch tables.
//!
//! For every registered type and every operation visible on it, the table
//! holds a [`DispatchChain`]: the implementations in method resolution order.
//!
//! ```text
//! MRO of MyButton2:   MyButton2(host) -> MyButton(host) -> Button -> Widget -> Object
//! chain of "paint":   HostOverride(MyButton2) -> HostOverride(MyButton) -> NativeDefault(Widget)
//! ```
//!
//! The head of a chain is what a call resolves to. `call_super` inside an
//! override runs the entry after it. A chain always ends with the first
//! native declaration, either `NativeDefault` or `Pure`.
//!
//! Chains are built once, when a type is registered. Bases must be
//! registered first, so a chain never changes afterwards.

use std::cell::Cell;
use std::sync::Arc;

use objbridge_core::{
    BridgeError, BridgeResult, OperationDecl, RegistrationError, TypeDescriptor, TypeHash, Value,
};
use objbridge_registry::TypeRegistry;
use rustc_hash::FxHashMap;

use crate::callable::{HostClass, HostFn};

/// One implementation of an operation.
#[derive(Debug, Clone)]
pub enum Target {
    /// A host override, defined by the host type `defined_in`.
    HostOverride {
        callable: HostFn,
        defined_in: TypeHash,
    },
    /// The native implementation declared in `declared_in`.
    NativeDefault { declared_in: TypeHash },
    /// A pure virtual declaration without implementation.
    Pure { declared_in: TypeHash },
}

impl Target {
    pub fn is_host(&self) -> bool {
        matches!(self, Target::HostOverride { .. })
    }
}

/// Outcome of a native-originated virtual call.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualDispatch {
    /// A host override ran and produced this value.
    Handled(Value),
    /// No override applies; native code runs its own implementation.
    UseNativeDefault,
}

/// Implementations of one operation on one type, most derived first.
#[derive(Debug)]
pub struct DispatchChain {
    type_name: String,
    operation: OperationDecl,
    native_name: String,
    targets: Vec<Target>,
}

impl DispatchChain {
    /// Most-derived type the chain was built for.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The native declaration terminating the chain.
    pub fn operation(&self) -> &OperationDecl {
        &self.operation
    }

    /// Name of the native type declaring the operation.
    pub fn native_name(&self) -> &str {
        &self.native_name
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// The implementation a call resolves to.
    pub fn head(&self) -> &Target {
        // chains always end with a native declaration
        &self.targets[0]
    }
}

/// Type registry plus the dispatch chains derived from it.
#[derive(Debug, Default)]
pub struct DispatchTable {
    types: TypeRegistry,
    overrides: FxHashMap<(TypeHash, TypeHash), HostFn>,
    chains: FxHashMap<(TypeHash, TypeHash), Arc<DispatchChain>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Register a native type and build its chains.
    pub fn register_native(&mut self, descriptor: TypeDescriptor) -> Result<TypeHash, RegistrationError> {
        if descriptor.is_host() {
            return Err(RegistrationError::InvalidHostType {
                type_name: descriptor.name().to_string(),
                reason: "host types are registered through HostClass",
            });
        }
        let hash = self.types.register(descriptor)?;
        self.build_chains(hash);
        Ok(hash)
    }

    /// Register a host subclass with its overrides and build its chains.
    ///
    /// Every override must name a virtual operation declared by one of the
    /// bases. Nothing is registered if any override is rejected.
    pub fn register_host(&mut self, class: HostClass) -> Result<TypeHash, RegistrationError> {
        let (descriptor, overrides) = class.into_parts();
        let type_name = descriptor.name().to_string();

        let mut validated: Vec<(TypeHash, HostFn)> = Vec::with_capacity(overrides.len());
        for (operation, callable) in overrides {
            let op_hash = TypeHash::from_operation(&operation);
            if validated.iter().any(|(h, _)| *h == op_hash) {
                return Err(RegistrationError::DuplicateOperation {
                    type_name,
                    operation,
                });
            }
            let decl = descriptor.bases().iter().find_map(|base| {
                let base_hash = self.types.get_by_name(base)?.hash();
                self.types.find_operation(base_hash, op_hash).map(|(_, op)| op)
            });
            match decl {
                None => {
                    return Err(RegistrationError::UnknownOperation {
                        type_name,
                        operation,
                    });
                }
                Some(op) if !op.is_virtual() => {
                    return Err(RegistrationError::NotVirtual {
                        type_name,
                        operation,
                    });
                }
                Some(_) => validated.push((op_hash, callable)),
            }
        }

        let hash = self.types.register(descriptor)?;
        for (op_hash, callable) in validated {
            self.overrides.insert((hash, op_hash), callable);
        }
        self.build_chains(hash);
        Ok(hash)
    }

    fn build_chains(&mut self, hash: TypeHash) {
        let Some(mro) = self.types.mro(hash) else {
            return;
        };
        let type_name = self.types.get(hash).map(|d| d.name().to_string()).unwrap_or_default();

        let mut built = Vec::new();
        for (declared_in, decl) in self.types.visible_operations(hash) {
            let mut targets = Vec::new();
            for t in mro {
                let Some(descriptor) = self.types.get(*t) else {
                    continue;
                };
                if descriptor.is_host() {
                    if let Some(callable) = self.overrides.get(&(*t, decl.hash())) {
                        targets.push(Target::HostOverride {
                            callable: callable.clone(),
                            defined_in: *t,
                        });
                    }
                } else if *t == declared_in {
                    break;
                }
            }
            targets.push(if decl.is_pure() {
                Target::Pure { declared_in }
            } else {
                Target::NativeDefault { declared_in }
            });

            let native_name = self
                .types
                .get(declared_in)
                .map(|d| d.name().to_string())
                .unwrap_or_default();
            built.push((
                decl.hash(),
                DispatchChain {
                    type_name: type_name.clone(),
                    operation: decl.clone(),
                    native_name,
                    targets,
                },
            ));
        }

        for (op_hash, chain) in built {
            self.chains.insert((hash, op_hash), Arc::new(chain));
        }
    }

    /// Chain of `operation` on `type_hash`.
    ///
    /// # Errors
    ///
    /// `TypeNotRegistered` for unknown types, `UnknownOperation` when no
    /// type in the hierarchy declares the operation.
    pub fn chain(&self, type_hash: TypeHash, operation: &str) -> BridgeResult<Arc<DispatchChain>> {
        let descriptor = self
            .types
            .get(type_hash)
            .ok_or(BridgeError::TypeNotRegistered(type_hash))?;
        self.chains
            .get(&(type_hash, TypeHash::from_operation(operation)))
            .cloned()
            .ok_or_else(|| BridgeError::UnknownOperation {
                type_name: descriptor.name().to_string(),
                operation: operation.to_string(),
            })
    }

    /// The implementation a call of `operation` on `type_hash` resolves to.
    pub fn lookup(&self, type_hash: TypeHash, operation: &str) -> BridgeResult<Target> {
        self.chain(type_hash, operation).map(|c| c.head().clone())
    }
}

// ============================================================================
// Re-entrancy depth
// ============================================================================

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of dispatch on the current thread while alive.
pub(crate) struct DepthGuard(());

impl DepthGuard {
    pub(crate) fn enter(limit: usize) -> BridgeResult<Self> {
        DISPATCH_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= limit {
                return Err(BridgeError::RecursionLimit { limit });
            }
            depth.set(current + 1);
            Ok(DepthGuard(()))
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_core::ValueKind;

    fn widget_table() -> DispatchTable {
        let mut table = DispatchTable::new();
        table
            .register_native(
                TypeDescriptor::native("Object")
                    .with_operation(OperationDecl::virtual_op("name", [], ValueKind::String)),
            )
            .unwrap();
        table
            .register_native(
                TypeDescriptor::native("Widget")
                    .with_base("Object")
                    .with_operation(OperationDecl::virtual_op("paint", [], ValueKind::Void))
                    .with_operation(OperationDecl::new("show", [], ValueKind::Void))
                    .with_operation(OperationDecl::pure_virtual("size_hint", [], ValueKind::Int)),
            )
            .unwrap();
        table
    }

    fn noop() -> HostFn {
        HostFn::new(|_| Ok(Value::Void))
    }

    #[test]
    fn native_chain_is_single_default() {
        let table = widget_table();
        let widget = TypeHash::from_name("Widget");
        assert!(matches!(
            table.lookup(widget, "name").unwrap(),
            Target::NativeDefault { declared_in } if declared_in == TypeHash::from_name("Object")
        ));
        assert!(matches!(table.lookup(widget, "size_hint").unwrap(), Target::Pure { .. }));
    }

    #[test]
    fn two_host_levels_chain_most_derived_first() {
        let mut table = widget_table();
        let first = noop();
        let second = noop();
        table
            .register_host(HostClass::new("Mine").with_base("Widget").with_override("paint", first.clone()))
            .unwrap();
        table
            .register_host(HostClass::new("Mine2").with_base("Mine").with_override("paint", second.clone()))
            .unwrap();

        let chain = table.chain(TypeHash::from_name("Mine2"), "paint").unwrap();
        let targets = chain.targets();
        assert_eq!(targets.len(), 3);
        assert!(matches!(&targets[0], Target::HostOverride { callable, .. } if *callable == second));
        assert!(matches!(&targets[1], Target::HostOverride { callable, .. } if *callable == first));
        assert!(matches!(targets[2], Target::NativeDefault { .. }));
        assert_eq!(chain.native_name(), "Widget");
    }

    #[test]
    fn host_level_without_override_is_skipped() {
        let mut table = widget_table();
        let first = noop();
        table
            .register_host(HostClass::new("Mine").with_base("Widget").with_override("paint", first.clone()))
            .unwrap();
        table
            .register_host(HostClass::new("Plain").with_base("Mine"))
            .unwrap();
        assert!(matches!(
            table.lookup(TypeHash::from_name("Plain"), "paint").unwrap(),
            Target::HostOverride { defined_in, .. } if defined_in == TypeHash::from_name("Mine")
        ));
    }

    #[test]
    fn non_virtual_override_rejected() {
        let mut table = widget_table();
        let err = table
            .register_host(HostClass::new("Bad").with_base("Widget").with_override("show", noop()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::NotVirtual { .. }));
        assert!(!table.types().contains(TypeHash::from_name("Bad")));
    }

    #[test]
    fn unknown_override_rejected() {
        let mut table = widget_table();
        let err = table
            .register_host(HostClass::new("Bad").with_base("Widget").with_override("explode", noop()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownOperation { .. }));
    }

    #[test]
    fn unknown_operation_lookup() {
        let table = widget_table();
        assert!(matches!(
            table.lookup(TypeHash::from_name("Widget"), "missing"),
            Err(BridgeError::UnknownOperation { .. })
        ));
        assert!(matches!(
            table.lookup(TypeHash::from_name("Nope"), "paint"),
            Err(BridgeError::TypeNotRegistered(_))
        ));
    }

    #[test]
    fn depth_guard_limits_and_unwinds() {
        let outer = DepthGuard::enter(2).unwrap();
        let inner = DepthGuard::enter(2).unwrap();
        assert!(matches!(
            DepthGuard::enter(2),
            Err(BridgeError::RecursionLimit { limit: 2 })
        ));
        drop(inner);
        drop(outer);
        assert!(DepthGuard::enter(1).is_ok());
    }
}
