//! The untagged decode surface: a single `Value` returned by
//! `read_value()` for callers that don't know the on-disk datatype
//! ahead of time, plus `FromValue` for the type-parameterized `read<T>()`
//! path used when the caller does know it.

use crate::{Error, Result};

/// A single decoded element. Compound members preserve declaration
/// order (an ordered list of name/value pairs, not a map, since
/// compound datatype members may repeat byte ranges across padding
/// but never repeat names).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Enum(String, i64),
    Compound(Vec<(String, Value)>),
    Array(Vec<Value>),
}

/// Implemented by every concrete type `read<T>()` may be called with.
/// Mismatched on-disk class is a `WrongKind` error, never a silent
/// conversion — this crate never performs a silent lossy conversion.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

macro_rules! from_value_int {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(*v),
                    other => Err(Error::wrong_kind(format!(
                        "expected {}, found {other:?}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

from_value_int!(i8, I8);
from_value_int!(i16, I16);
from_value_int!(i32, I32);
from_value_int!(i64, I64);
from_value_int!(u8, U8);
from_value_int!(u16, U16);
from_value_int!(u32, U32);
from_value_int!(u64, U64);
from_value_int!(f32, F32);
from_value_int!(f64, F64);

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(Error::wrong_kind(format!("expected string, found {other:?}"))),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(Error::wrong_kind(format!("expected bytes, found {other:?}"))),
        }
    }
}

/// Converts every element of an `Array` value via `FromValue`. Not a
/// blanket `impl<T> FromValue for Vec<T>` because that would collide
/// with the `Vec<u8>` impl above (which reads the `Bytes` variant,
/// not an `Array` of `U8`s).
pub fn array_values<T: FromValue>(value: &Value) -> Result<Vec<T>> {
    match value {
        Value::Array(items) => items.iter().map(T::from_value).collect(),
        other => Err(Error::wrong_kind(format!("expected array, found {other:?}"))),
    }
}
