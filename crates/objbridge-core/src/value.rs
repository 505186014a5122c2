//! Values crossing the host/native boundary.
//!
//! [`Value`] is the unified representation of every argument and return
//! value. Object references travel as bare [`NativeHandle`]s: a value never
//! owns a wrapper, so storing a value anywhere cannot keep a native object
//! alive or extend a wrapper's lifetime.
//!
//! [`ValueKind`] describes the declared kind of a parameter, return value, or
//! signal argument, and is what the marshalling step checks values against.

use std::fmt;

use crate::error::ConversionError;
use crate::{NativeHandle, TypeHash};

/// A dynamic value that can cross the boundary.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// Void/empty
    Void,
    /// Integer value (all integer widths are stored as i64)
    Int(i64),
    /// Floating point value (f32 and f64 both stored as f64)
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value (owned)
    String(String),
    /// Enumerator of a registered enum type
    Enum {
        /// The enum type.
        type_hash: TypeHash,
        /// The enumerator value.
        value: i64,
    },
    /// Reference to a native object
    Object(NativeHandle),
    /// Null object reference
    Null,
    /// Sequence container
    List(Vec<Value>),
}

impl Value {
    /// Get a human-readable name for this value's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Enum { .. } => "enum",
            Value::Object(_) => "object",
            Value::Null => "null",
            Value::List(_) => "list",
        }
    }

    /// Check if this value is void.
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Check if this value is a null reference.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The object handle this value refers to, if any.
    pub fn as_handle(&self) -> Option<NativeHandle> {
        match self {
            Value::Object(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "Void"),
            Value::Int(v) => write!(f, "Int({})", v),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Enum { type_hash, value } => write!(f, "Enum({type_hash}, {value})"),
            Value::Object(h) => write!(f, "Object({})", h),
            Value::Null => write!(f, "Null"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

/// Declared kind of a parameter, return value, or signal argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value (return kinds only)
    Void,
    /// Integer
    Int,
    /// Float; integers are widened implicitly
    Float,
    /// Boolean
    Bool,
    /// String
    String,
    /// Enumerator of the given enum type
    Enum(TypeHash),
    /// Object reference, null not allowed
    Object,
    /// Object reference or null
    NullableObject,
    /// Homogeneous list
    List(Box<ValueKind>),
    /// Anything; passed through unchanged
    Any,
}

impl ValueKind {
    /// Check `value` against this kind and apply implicit conversions.
    ///
    /// The only implicit conversions are int-to-float widening (also applied
    /// to list elements). Everything else must match exactly.
    pub fn coerce(&self, value: Value) -> Result<Value, ConversionError> {
        match (self, value) {
            (ValueKind::Any, v) => Ok(v),
            (ValueKind::Void, Value::Void) => Ok(Value::Void),
            (ValueKind::Int, Value::Int(v)) => Ok(Value::Int(v)),
            (ValueKind::Float, Value::Float(v)) => Ok(Value::Float(v)),
            (ValueKind::Float, Value::Int(v)) => Ok(Value::Float(v as f64)),
            (ValueKind::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
            (ValueKind::String, Value::String(s)) => Ok(Value::String(s)),
            (ValueKind::Enum(expected), Value::Enum { type_hash, value }) => {
                if *expected == type_hash {
                    Ok(Value::Enum { type_hash, value })
                } else {
                    Err(ConversionError::EnumMismatch {
                        expected: *expected,
                        actual: type_hash,
                    })
                }
            }
            (ValueKind::Object | ValueKind::NullableObject, Value::Object(h)) => {
                Ok(Value::Object(h))
            }
            (ValueKind::NullableObject, Value::Null) => Ok(Value::Null),
            (ValueKind::Object, Value::Null) => Err(ConversionError::NullHandle {
                target_type: "object",
            }),
            (ValueKind::List(elem), Value::List(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    elem.coerce(item).map_err(|e| ConversionError::Element {
                        index,
                        source: Box::new(e),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (kind, other) => Err(ConversionError::TypeMismatch {
                expected: kind.to_string(),
                actual: other.type_name(),
            }),
        }
    }

    /// Coerce a whole argument list against a parameter list.
    ///
    /// Either every argument converts or nothing is returned; arity is
    /// checked first.
    pub fn coerce_args(params: &[ValueKind], args: &[Value]) -> Result<Vec<Value>, ConversionError> {
        if params.len() != args.len() {
            return Err(ConversionError::ArityMismatch {
                expected: params.len(),
                actual: args.len(),
            });
        }
        params
            .iter()
            .zip(args.iter().cloned())
            .map(|(kind, arg)| kind.coerce(arg))
            .collect()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Void => write!(f, "void"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Enum(hash) => write!(f, "enum {hash}"),
            ValueKind::Object => write!(f, "object"),
            ValueKind::NullableObject => write!(f, "object?"),
            ValueKind::List(elem) => write!(f, "list<{elem}>"),
            ValueKind::Any => write!(f, "any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_widens_to_float() {
        assert_eq!(ValueKind::Float.coerce(Value::Int(3)), Ok(Value::Float(3.0)));
    }

    #[test]
    fn float_does_not_narrow_to_int() {
        let err = ValueKind::Int.coerce(Value::Float(1.5)).unwrap_err();
        assert_eq!(
            err,
            ConversionError::TypeMismatch {
                expected: "int".to_string(),
                actual: "float",
            }
        );
    }

    #[test]
    fn null_only_for_nullable_objects() {
        assert_eq!(ValueKind::NullableObject.coerce(Value::Null), Ok(Value::Null));
        assert!(matches!(
            ValueKind::Object.coerce(Value::Null),
            Err(ConversionError::NullHandle { .. })
        ));
    }

    #[test]
    fn enum_types_must_match() {
        let color = TypeHash::from_name("Color");
        let shape = TypeHash::from_name("Shape");
        let value = Value::Enum {
            type_hash: shape,
            value: 1,
        };
        assert!(matches!(
            ValueKind::Enum(color).coerce(value),
            Err(ConversionError::EnumMismatch { .. })
        ));
    }

    #[test]
    fn list_element_failure_reports_index() {
        let kind = ValueKind::List(Box::new(ValueKind::Int));
        let value = Value::List(vec![Value::Int(1), Value::Bool(true)]);
        match kind.coerce(value) {
            Err(ConversionError::Element { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected element error, got {other:?}"),
        }
    }

    #[test]
    fn list_elements_are_widened() {
        let kind = ValueKind::List(Box::new(ValueKind::Float));
        let value = Value::List(vec![Value::Int(1), Value::Float(2.5)]);
        assert_eq!(
            kind.coerce(value),
            Ok(Value::List(vec![Value::Float(1.0), Value::Float(2.5)]))
        );
    }

    #[test]
    fn coerce_args_checks_arity_first() {
        let err = ValueKind::coerce_args(&[ValueKind::Int], &[]).unwrap_err();
        assert_eq!(
            err,
            ConversionError::ArityMismatch {
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn display_kinds() {
        assert_eq!(ValueKind::List(Box::new(ValueKind::NullableObject)).to_string(), "list<object?>");
    }
}
