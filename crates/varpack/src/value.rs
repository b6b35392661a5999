//! # Values
//!
//! Native values that travel inside a [`Container`](crate::Container).

use crate::types::MAX_DEPTH;
use crate::types::Type;

/// A native value. Whether it is valid is only known once packed against a [`Type`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(String),
    Array(Vec<Value>),
    /// Ordered key/value entries.
    Dict(Vec<(Value, Value)>),
    Struct(Vec<Value>),
    Variant(Box<Variant>),
}

/// A value boxed together with its own type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    ty: Type,
    value: Value,
}

impl Variant {
    /// Packs `value` against `ty` and boxes the result.
    pub fn new(ty: Type, value: Value) -> crate::Result<Self> {
        let value = crate::codec::coerce(&ty, value)?;
        Ok(Self { ty, value })
    }

    /// Boxes a value using its inferred type, then packs it against that type.
    pub fn infer(value: Value) -> crate::Result<Self> {
        crate::codec::infer_variant(value, 0)
    }

    pub(crate) fn from_parts(ty: Type, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Value {
    /// A short human-readable kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Byte(_) => "byte",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::UInt16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::ObjectPath(_) => "object-path",
            Value::Signature(_) => "signature",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Variant(_) => "variant",
        }
    }

    /// The type this value would take without any coercion.
    ///
    /// Returns `None` when it cannot be known, e.g. for an empty array, an
    /// array whose elements disagree, or nesting deeper than `MAX_DEPTH`.
    pub fn infer_type(&self) -> Option<Type> {
        self.infer_type_at(0).ok()
    }

    pub(crate) fn infer_type_at(&self, depth: usize) -> crate::Result<Type> {
        if depth > MAX_DEPTH {
            return Err(crate::Error::RecursionLimitExceeded);
        }
        let unknown = || crate::Error::CannotInfer(self.type_name().to_string());

        let ty = match self {
            Value::Byte(_) => Type::Byte,
            Value::Bool(_) => Type::Bool,
            Value::Int16(_) => Type::Int16,
            Value::UInt16(_) => Type::UInt16,
            Value::Int32(_) => Type::Int32,
            Value::UInt32(_) => Type::UInt32,
            Value::Int64(_) => Type::Int64,
            Value::UInt64(_) => Type::UInt64,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::Variant(_) => Type::Variant,
            Value::Array(items) => {
                let (first, rest) = items.split_first().ok_or_else(unknown)?;
                let elem = first.infer_type_at(depth + 1)?;
                for item in rest {
                    if item.infer_type_at(depth + 1)? != elem {
                        return Err(unknown());
                    }
                }
                Type::Array(Box::new(elem))
            }
            Value::Dict(entries) => {
                let ((k, v), rest) = entries.split_first().ok_or_else(unknown)?;
                let key = k.infer_type_at(depth + 1)?;
                let value = v.infer_type_at(depth + 1)?;
                if !key.is_basic() {
                    return Err(unknown());
                }
                for (k, v) in rest {
                    if k.infer_type_at(depth + 1)? != key || v.infer_type_at(depth + 1)? != value {
                        return Err(unknown());
                    }
                }
                Type::Dict(Box::new(key), Box::new(value))
            }
            Value::Struct(fields) => Type::Struct(
                fields
                    .iter()
                    .map(|field| field.infer_type_at(depth + 1))
                    .collect::<crate::Result<Vec<_>>>()?,
            ),
        };
        Ok(ty)
    }

    pub fn is_integer(&self) -> bool {
        self.as_i128().is_some()
    }

    /// Widens any integer value; `None` for everything else.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Byte(v) => Some(i128::from(*v)),
            Value::Int16(v) => Some(i128::from(*v)),
            Value::UInt16(v) => Some(i128::from(*v)),
            Value::Int32(v) => Some(i128::from(*v)),
            Value::UInt32(v) => Some(i128::from(*v)),
            Value::Int64(v) => Some(i128::from(*v)),
            Value::UInt64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i128().and_then(|v| u32::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrows the text of a string, object path or signature.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the items of an array or struct.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Struct(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&Variant> {
        match self {
            Value::Variant(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a dictionary entry by string key.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    u8 => Byte,
    bool => Bool,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f64 => Double,
    String => String,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Variant> for Value {
    fn from(v: Variant) -> Self {
        Value::Variant(Box::new(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
