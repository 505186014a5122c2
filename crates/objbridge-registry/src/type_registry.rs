//! TypeRegistry - the class hierarchy known to the bridge.
//!
//! Uses `petgraph::DiGraph` with:
//! - Nodes: `TypeHash` of each registered type
//! - Edges: derived -> base, weighted with the base's position in the
//!   derived type's base list
//!
//! Every type gets its method resolution order (MRO) computed once, at
//! registration, by C3 linearization over its bases. Bases must be
//! registered before the types deriving from them, so the graph can never
//! contain a cycle.
//!
//! # Example
//!
//! ```
//! use objbridge_core::{OperationDecl, TypeDescriptor, TypeHash, ValueKind};
//! use objbridge_registry::TypeRegistry;
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(
//!     TypeDescriptor::native("Object")
//!         .with_operation(OperationDecl::virtual_op("name", [], ValueKind::String)),
//! ).unwrap();
//! let timer = registry.register(TypeDescriptor::native("Timer").with_base("Object")).unwrap();
//!
//! let (declared_in, op) = registry
//!     .find_operation(timer, TypeHash::from_operation("name"))
//!     .unwrap();
//! assert_eq!(declared_in, TypeHash::from_name("Object"));
//! assert!(op.is_virtual());
//! ```

use objbridge_core::{OperationDecl, RegistrationError, SignalDecl, TypeDescriptor, TypeHash};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug)]
struct RegisteredType {
    descriptor: TypeDescriptor,
    node: NodeIndex,
    mro: Vec<TypeHash>,
}

/// Registry of every native and host type.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    graph: DiGraph<TypeHash, usize>,
    types: FxHashMap<TypeHash, RegisteredType>,
    by_name: FxHashMap<String, TypeHash>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a type. All of its bases must already be registered.
    ///
    /// # Errors
    ///
    /// - `DuplicateType` if the name is taken
    /// - `DuplicateBase` / `DuplicateOperation` for repeated declarations
    /// - `TypeNotFound` if a base is unknown
    /// - `InvalidHostType` if a host type declares operations, has no bases,
    ///   or a native type derives from a host type
    /// - `InconsistentHierarchy` if the bases admit no C3 linearization
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<TypeHash, RegistrationError> {
        let name = descriptor.name().to_string();
        let hash = descriptor.hash();
        if self.by_name.contains_key(&name) || self.types.contains_key(&hash) {
            return Err(RegistrationError::DuplicateType(name));
        }

        let mut seen_ops = FxHashSet::default();
        for op in descriptor.operations() {
            if !seen_ops.insert(op.hash()) {
                return Err(RegistrationError::DuplicateOperation {
                    type_name: name,
                    operation: op.name().to_string(),
                });
            }
        }

        if descriptor.is_host() {
            if !descriptor.operations().is_empty() {
                return Err(RegistrationError::InvalidHostType {
                    type_name: name,
                    reason: "host types may only override inherited operations",
                });
            }
            if descriptor.bases().is_empty() {
                return Err(RegistrationError::InvalidHostType {
                    type_name: name,
                    reason: "host types must derive from a native type",
                });
            }
        }

        let mut base_hashes = Vec::with_capacity(descriptor.bases().len());
        for base in descriptor.bases() {
            let base_hash = *self
                .by_name
                .get(base)
                .ok_or_else(|| RegistrationError::TypeNotFound(base.clone()))?;
            if base_hashes.contains(&base_hash) {
                return Err(RegistrationError::DuplicateBase {
                    type_name: name,
                    base: base.clone(),
                });
            }
            if !descriptor.is_host() && self.types[&base_hash].descriptor.is_host() {
                return Err(RegistrationError::InvalidHostType {
                    type_name: base.clone(),
                    reason: "native types cannot derive from host types",
                });
            }
            base_hashes.push(base_hash);
        }

        let mro = self
            .linearize(hash, &base_hashes)
            .ok_or_else(|| RegistrationError::InconsistentHierarchy {
                type_name: name.clone(),
            })?;

        let node = self.graph.add_node(hash);
        for (position, base_hash) in base_hashes.iter().enumerate() {
            let base_node = self.types[base_hash].node;
            self.graph.add_edge(node, base_node, position);
        }

        self.by_name.insert(name, hash);
        self.types.insert(
            hash,
            RegisteredType {
                descriptor,
                node,
                mro,
            },
        );
        Ok(hash)
    }

    // C3: L[T] = T + merge(L[B1], ..., L[Bn], [B1, ..., Bn])
    fn linearize(&self, hash: TypeHash, bases: &[TypeHash]) -> Option<Vec<TypeHash>> {
        let mut sequences: Vec<Vec<TypeHash>> = bases
            .iter()
            .map(|b| self.types[b].mro.clone())
            .collect();
        sequences.push(bases.to_vec());

        let mut result = vec![hash];
        loop {
            sequences.retain(|s| !s.is_empty());
            if sequences.is_empty() {
                return Some(result);
            }

            // a head that appears in no tail
            let candidate = sequences
                .iter()
                .map(|s| s[0])
                .find(|c| !sequences.iter().any(|s| s[1..].contains(c)))?;

            result.push(candidate);
            for sequence in &mut sequences {
                if sequence[0] == candidate {
                    sequence.remove(0);
                }
            }
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Descriptor of a registered type.
    pub fn get(&self, hash: TypeHash) -> Option<&TypeDescriptor> {
        self.types.get(&hash).map(|t| &t.descriptor)
    }

    /// Descriptor of a registered type, by name.
    pub fn get_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).and_then(|h| self.get(*h))
    }

    /// Whether a type is registered.
    pub fn contains(&self, hash: TypeHash) -> bool {
        self.types.contains_key(&hash)
    }

    /// Method resolution order, starting with the type itself.
    pub fn mro(&self, hash: TypeHash) -> Option<&[TypeHash]> {
        self.types.get(&hash).map(|t| t.mro.as_slice())
    }

    /// Whether `derived` is `base` or inherits from it.
    pub fn is_subtype(&self, derived: TypeHash, base: TypeHash) -> bool {
        self.mro(derived).is_some_and(|mro| mro.contains(&base))
    }

    /// Direct bases in declaration order.
    pub fn direct_bases(&self, hash: TypeHash) -> Vec<TypeHash> {
        let Some(entry) = self.types.get(&hash) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, TypeHash)> = self
            .graph
            .edges_directed(entry.node, Direction::Outgoing)
            .map(|e| (*e.weight(), self.graph[e.target()]))
            .collect();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, h)| h).collect()
    }

    /// Types that list `hash` as a direct base.
    pub fn direct_subtypes(&self, hash: TypeHash) -> Vec<TypeHash> {
        let Some(entry) = self.types.get(&hash) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(entry.node, Direction::Incoming)
            .map(|n| self.graph[n])
            .collect()
    }

    /// First declaration of an operation along the MRO of `hash`.
    ///
    /// Returns the declaring type together with the declaration.
    pub fn find_operation(
        &self,
        hash: TypeHash,
        operation: TypeHash,
    ) -> Option<(TypeHash, &OperationDecl)> {
        self.mro(hash)?.iter().find_map(|t| {
            self.get(*t)
                .and_then(|d| d.operation_by_hash(operation))
                .map(|op| (*t, op))
        })
    }

    /// First declaration of a signal along the MRO of `hash`.
    pub fn find_signal(&self, hash: TypeHash, signal: TypeHash) -> Option<(TypeHash, &SignalDecl)> {
        self.mro(hash)?.iter().find_map(|t| {
            self.get(*t)
                .and_then(|d| d.signal_by_hash(signal))
                .map(|s| (*t, s))
        })
    }

    /// Every operation visible on `hash`, each once, in MRO order.
    pub fn visible_operations(&self, hash: TypeHash) -> Vec<(TypeHash, &OperationDecl)> {
        let Some(mro) = self.mro(hash) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        let mut ops = Vec::new();
        for t in mro {
            let Some(descriptor) = self.get(*t) else {
                continue;
            };
            for op in descriptor.operations() {
                if seen.insert(op.hash()) {
                    ops.push((*t, op));
                }
            }
        }
        ops
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All registered types, in no particular order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values().map(|t| &t.descriptor)
    }
}
