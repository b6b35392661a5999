//! # Codec
//!
//! Packs positional values against an ordered list of type tags into a
//! [`Container`], and unpacks containers back into values.
//!
//! ## Invariants
//! - **Structural Match**: A `Container` only exists if every value matches its tag.
//! - **Canonical Values**: Packing normalizes values (an `Int32` packed as `u` is
//!   stored as `UInt32`), so unpacking yields exactly the packed shape.
//! - **Recursion Safety**: All recursive operations are bounded by `MAX_DEPTH`.

use crate::error::Error;
use crate::error::Result;
use crate::types::MAX_DEPTH;
use crate::types::Type;
use crate::types::tuple_signature;
use crate::value::Value;
use crate::value::Variant;

/// A self-describing tuple: ordered type tags plus values that match them.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    types: Vec<Type>,
    values: Vec<Value>,
}

impl Container {
    /// The empty tuple `()`.
    pub fn empty() -> Self {
        Self { types: Vec::new(), values: Vec::new() }
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The tuple tag, e.g. `(si)`.
    pub fn signature(&self) -> String {
        tuple_signature(&self.types)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Packs `values` against `types`.
///
/// # Errors
/// `ArityMismatch` if the counts differ, otherwise the first per-value failure.
pub fn pack(types: &[Type], values: Vec<Value>) -> Result<Container> {
    if types.len() != values.len() {
        return Err(Error::ArityMismatch { expected: types.len(), found: values.len() });
    }

    let values = types
        .iter()
        .zip(values)
        .map(|(ty, value)| coerce_impl(ty, value, 0))
        .collect::<Result<Vec<_>>>()?;

    Ok(Container { types: types.to_vec(), values })
}

/// Parses `signature` (the inside of a tuple, e.g. `si`) and packs against it.
pub fn pack_str(signature: &str, values: Vec<Value>) -> Result<Container> {
    let types = Type::parse_many(signature)?;
    pack(&types, values)
}

/// Unpacks a container into its positional values.
pub fn unpack(container: Container) -> Vec<Value> {
    container.values
}

/// Unpacks a container, first checking its tags equal `types`.
pub fn unpack_as(container: Container, types: &[Type]) -> Result<Vec<Value>> {
    if container.types != types {
        return Err(Error::SignatureMismatch {
            expected: tuple_signature(types),
            found: container.signature(),
        });
    }
    Ok(container.values)
}

/// Packs a single value against a single type.
pub(crate) fn coerce(ty: &Type, value: Value) -> Result<Value> {
    coerce_impl(ty, value, 0)
}

/// Infers a tag for `value` and packs it against that tag, so the boxed value
/// is validated like any other.
pub(crate) fn infer_variant(value: Value, depth: usize) -> Result<Variant> {
    let ty = value.infer_type_at(depth)?;
    let value = coerce_impl(&ty, value, depth)?;
    Ok(Variant::from_parts(ty, value))
}

fn mismatch(ty: &Type, value: &Value) -> Error {
    Error::TypeMismatch { expected: ty.to_string(), found: value.type_name().to_string() }
}

fn coerce_impl(ty: &Type, value: Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    if ty.is_integer() {
        return coerce_integer(ty, value);
    }

    match (ty, value) {
        (Type::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (Type::Double, Value::Double(d)) => Ok(Value::Double(d)),
        (Type::Double, value) => match value.as_i128() {
            // Integers beyond 2^53 lose precision exactly as they would in any IEEE conversion.
            Some(i) => Ok(Value::Double(i as f64)),
            None => Err(mismatch(ty, &value)),
        },
        (Type::String, Value::String(s)) => Ok(Value::String(s)),
        (Type::ObjectPath, Value::ObjectPath(s) | Value::String(s)) => {
            if is_valid_object_path(&s) {
                Ok(Value::ObjectPath(s))
            } else {
                Err(Error::InvalidObjectPath(s))
            }
        }
        (Type::Signature, Value::Signature(s) | Value::String(s)) => {
            if crate::types::is_valid_signature(&s) {
                Ok(Value::Signature(s))
            } else {
                Err(Error::InvalidSignature(s))
            }
        }
        (Type::Variant, Value::Variant(v)) => Ok(Value::Variant(v)),
        (Type::Variant, value) => Ok(Value::Variant(Box::new(infer_variant(value, depth + 1)?))),
        (Type::Array(elem), Value::Array(items)) => {
            let items = items
                .into_iter()
                .map(|item| coerce_impl(elem, item, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(items))
        }
        (Type::Dict(key_ty, value_ty), Value::Dict(entries)) => {
            let entries = entries
                .into_iter()
                .map(|(k, v)| {
                    Ok((coerce_impl(key_ty, k, depth + 1)?, coerce_impl(value_ty, v, depth + 1)?))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Dict(entries))
        }
        (Type::Struct(fields), Value::Struct(items) | Value::Array(items)) => {
            if fields.len() != items.len() {
                return Err(Error::ArityMismatch { expected: fields.len(), found: items.len() });
            }
            let items = fields
                .iter()
                .zip(items)
                .map(|(field, item)| coerce_impl(field, item, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Struct(items))
        }
        (ty, value) => Err(mismatch(ty, &value)),
    }
}

fn coerce_integer(ty: &Type, value: Value) -> Result<Value> {
    let Some(wide) = value.as_i128() else {
        return Err(mismatch(ty, &value));
    };
    let out_of_range = || mismatch(ty, &value);

    let packed = match ty {
        Type::Byte => Value::Byte(u8::try_from(wide).map_err(|_| out_of_range())?),
        Type::Int16 => Value::Int16(i16::try_from(wide).map_err(|_| out_of_range())?),
        Type::UInt16 => Value::UInt16(u16::try_from(wide).map_err(|_| out_of_range())?),
        Type::Int32 => Value::Int32(i32::try_from(wide).map_err(|_| out_of_range())?),
        Type::UInt32 => Value::UInt32(u32::try_from(wide).map_err(|_| out_of_range())?),
        Type::Int64 => Value::Int64(i64::try_from(wide).map_err(|_| out_of_range())?),
        Type::UInt64 => Value::UInt64(u64::try_from(wide).map_err(|_| out_of_range())?),
        _ => return Err(out_of_range()),
    };
    Ok(packed)
}

/// Object paths: `/`, or `/`-separated non-empty elements of `[A-Za-z0-9_]`.
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty() && element.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
