//! Conversion traits between Rust values and [`Value`].
//!
//! - [`FromValue`]: extract a Rust value from a [`Value`]
//! - [`IntoValue`]: convert a Rust value into a [`Value`]
//!
//! Host callables use these to read their arguments and build results.
//! Conversions never touch the registries: a failed conversion leaves every
//! wrapper and connection exactly as it was.
//!
//! ```
//! use objbridge_core::{FromValue, IntoValue, Value};
//!
//! let value = 42i32.into_value();
//! assert_eq!(value, Value::Int(42));
//! assert_eq!(i32::from_value(&value).unwrap(), 42);
//! assert!(u8::from_value(&Value::Int(300)).is_err());
//! ```

use crate::NativeHandle;
use crate::error::ConversionError;
use crate::value::Value;

/// Extract a value from a [`Value`].
pub trait FromValue: Sized {
    /// Extract a value, or report why the value does not fit.
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

/// Convert a value into a [`Value`].
pub trait IntoValue {
    /// Convert this value.
    fn into_value(self) -> Value;
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, ConversionError> {
                    match value {
                        Value::Int(v) => <$ty>::try_from(*v).map_err(|_| {
                            ConversionError::IntegerOverflow {
                                value: *v,
                                target_type: stringify!($ty),
                            }
                        }),
                        Value::Enum { value: v, .. } => <$ty>::try_from(*v).map_err(|_| {
                            ConversionError::IntegerOverflow {
                                value: *v,
                                target_type: stringify!($ty),
                            }
                        }),
                        other => Err(ConversionError::TypeMismatch {
                            expected: "int".to_string(),
                            actual: other.type_name(),
                        }),
                    }
                }
            }

            // only u64 can exceed i64; it saturates
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Int(i64::try_from(self).unwrap_or(i64::MAX))
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, u8, u16, u32, u64);

// ============================================================================
// Float, bool, string
// ============================================================================

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(ConversionError::TypeMismatch {
                expected: "float".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(ConversionError::TypeMismatch {
                expected: "bool".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(ConversionError::TypeMismatch {
                expected: "string".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Void
    }
}

impl FromValue for () {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Void => Ok(()),
            other => Err(ConversionError::TypeMismatch {
                expected: "void".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

// ============================================================================
// Objects and containers
// ============================================================================

impl FromValue for NativeHandle {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Object(h) => Ok(*h),
            Value::Null => Err(ConversionError::NullHandle {
                target_type: "object",
            }),
            other => Err(ConversionError::TypeMismatch {
                expected: "object".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoValue for NativeHandle {
    fn into_value(self) -> Value {
        Value::Object(self)
    }
}

/// Nullable object reference; `None` is [`Value::Null`].
impl FromValue for Option<NativeHandle> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => NativeHandle::from_value(other).map(Some),
        }
    }
}

impl IntoValue for Option<NativeHandle> {
    fn into_value(self) -> Value {
        match self {
            Some(h) => Value::Object(h),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    T::from_value(item).map_err(|e| ConversionError::Element {
                        index,
                        source: Box::new(e),
                    })
                })
                .collect(),
            other => Err(ConversionError::TypeMismatch {
                expected: "list".to_string(),
                actual: other.type_name(),
            }),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}
