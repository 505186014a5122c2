//! Registries behind the bridge.
//!
//! - [`IdentityRegistry`]: native handle to host wrapper, generation-stamped
//! - [`OwnershipGraph`]: parent/child relations between native objects
//! - [`TypeRegistry`]: the class hierarchy and its method resolution orders
//!
//! None of these types synchronize internally. The bridge keeps them behind
//! a single lock so that identity and ownership change together.

pub mod identity;
pub mod ownership_graph;
pub mod type_registry;

pub use identity::{IdentityRegistry, Liveness};
pub use ownership_graph::OwnershipGraph;
pub use type_registry::TypeRegistry;
