//! Bridge configuration.
//!
//! [`BridgeConfig`] carries the tunables of one bridge. Each tunable is also
//! addressable as a [`BridgeProperty`] so embedders can set them from a
//! generic property table.
//!
//! ```
//! use objbridge::{BridgeConfig, BridgeProperty};
//!
//! let mut config = BridgeConfig::default().with_max_dispatch_depth(256);
//! config.set_property(BridgeProperty::DestroyOnCollect, 0).unwrap();
//!
//! assert_eq!(config.get_property(BridgeProperty::MaxDispatchDepth), 256);
//! assert!(!config.destroy_on_collect);
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeProperty {
    MaxAncestorDepth,
    MaxDispatchDepth,
    DestroyOnCollect,
}

impl BridgeProperty {
    pub fn default_value(&self) -> usize {
        match self {
            BridgeProperty::MaxAncestorDepth => 1024,
            BridgeProperty::MaxDispatchDepth => 10000,
            BridgeProperty::DestroyOnCollect => 1,
        }
    }
}

/// Rejected property assignment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("{property:?} must be at least 1, got {value}")]
    Zero { property: BridgeProperty, value: usize },

    #[error("{property:?} is a flag and only accepts 0 or 1, got {value}")]
    NotAFlag { property: BridgeProperty, value: usize },
}

/// Tunables of one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Longest ancestor chain walked when validating a reparenting.
    pub max_ancestor_depth: usize,
    /// Deepest re-entrant dispatch allowed on one thread.
    pub max_dispatch_depth: usize,
    /// Whether collecting a host-owned wrapper destroys the native object.
    pub destroy_on_collect: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_ancestor_depth: BridgeProperty::MaxAncestorDepth.default_value(),
            max_dispatch_depth: BridgeProperty::MaxDispatchDepth.default_value(),
            destroy_on_collect: BridgeProperty::DestroyOnCollect.default_value() != 0,
        }
    }
}

impl BridgeConfig {
    pub fn with_max_ancestor_depth(mut self, depth: usize) -> Self {
        self.max_ancestor_depth = depth.max(1);
        self
    }

    pub fn with_max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth.max(1);
        self
    }

    pub fn with_destroy_on_collect(mut self, enabled: bool) -> Self {
        self.destroy_on_collect = enabled;
        self
    }

    pub fn set_property(&mut self, property: BridgeProperty, value: usize) -> Result<(), PropertyError> {
        match property {
            BridgeProperty::MaxAncestorDepth | BridgeProperty::MaxDispatchDepth if value == 0 => {
                Err(PropertyError::Zero { property, value })
            }
            BridgeProperty::MaxAncestorDepth => {
                self.max_ancestor_depth = value;
                Ok(())
            }
            BridgeProperty::MaxDispatchDepth => {
                self.max_dispatch_depth = value;
                Ok(())
            }
            BridgeProperty::DestroyOnCollect => match value {
                0 | 1 => {
                    self.destroy_on_collect = value == 1;
                    Ok(())
                }
                _ => Err(PropertyError::NotAFlag { property, value }),
            },
        }
    }

    pub fn get_property(&self, property: BridgeProperty) -> usize {
        match property {
            BridgeProperty::MaxAncestorDepth => self.max_ancestor_depth,
            BridgeProperty::MaxDispatchDepth => self.max_dispatch_depth,
            BridgeProperty::DestroyOnCollect => usize::from(self.destroy_on_collect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_property_table() {
        let config = BridgeConfig::default();
        for property in [
            BridgeProperty::MaxAncestorDepth,
            BridgeProperty::MaxDispatchDepth,
            BridgeProperty::DestroyOnCollect,
        ] {
            assert_eq!(config.get_property(property), property.default_value());
        }
    }

    #[test]
    fn zero_depth_rejected() {
        let mut config = BridgeConfig::default();
        assert_eq!(
            config.set_property(BridgeProperty::MaxAncestorDepth, 0),
            Err(PropertyError::Zero {
                property: BridgeProperty::MaxAncestorDepth,
                value: 0
            })
        );
        assert_eq!(config.max_ancestor_depth, 1024);
    }

    #[test]
    fn flag_accepts_only_zero_or_one() {
        let mut config = BridgeConfig::default();
        assert!(config.set_property(BridgeProperty::DestroyOnCollect, 2).is_err());
        config.set_property(BridgeProperty::DestroyOnCollect, 0).unwrap();
        assert!(!config.destroy_on_collect);
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = BridgeConfig::default()
            .with_max_ancestor_depth(0)
            .with_max_dispatch_depth(0);
        assert_eq!(config.max_ancestor_depth, 1);
        assert_eq!(config.max_dispatch_depth, 1);
    }
}
