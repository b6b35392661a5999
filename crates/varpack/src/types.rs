//! # Type Tags
//!
//! The wire type alphabet. A tag string such as `a{sv}` or `(ii)` parses into a
//! single [`Type`]; a signature such as `sia{sv}` parses into a sequence of them.
//!
//! ## Invariants
//! - **Canonical Rendering**: `Type::parse(t.to_string()) == t` for every `Type`.
//! - **Basic Keys**: Dictionary keys are always basic (non-container, non-variant) types.
//! - **Bounded**: Parsing fails past `MAX_DEPTH` levels of nesting.

use crate::error::Error;
use crate::error::Result;

/// The maximum nesting depth for types and values.
pub const MAX_DEPTH: usize = 64;

/// One complete wire type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    /// A value of unknown type that carries its own tag.
    Variant,
    Array(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Struct(Vec<Type>),
}

impl Type {
    /// Parses exactly one complete type.
    pub fn parse(tag: &str) -> Result<Type> {
        let mut parser = Parser::new(tag);
        let ty = parser.complete(0)?;
        if !parser.is_done() {
            return Err(Error::InvalidSignature(tag.to_string()));
        }
        Ok(ty)
    }

    /// Parses a concatenation of complete types, e.g. the inside of a tuple.
    pub fn parse_many(signature: &str) -> Result<Vec<Type>> {
        let mut parser = Parser::new(signature);
        let mut types = Vec::new();
        while !parser.is_done() {
            types.push(parser.complete(0)?);
        }
        Ok(types)
    }

    /// True for types that may key a dictionary.
    pub fn is_basic(&self) -> bool {
        !matches!(self, Type::Variant | Type::Array(_) | Type::Dict(..) | Type::Struct(_))
    }

    /// True for the fixed-width integer types.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::Byte
                | Type::Int16
                | Type::UInt16
                | Type::Int32
                | Type::UInt32
                | Type::Int64
                | Type::UInt64
        )
    }

    fn code(&self) -> Option<char> {
        let c = match self {
            Type::Byte => 'y',
            Type::Bool => 'b',
            Type::Int16 => 'n',
            Type::UInt16 => 'q',
            Type::Int32 => 'i',
            Type::UInt32 => 'u',
            Type::Int64 => 'x',
            Type::UInt64 => 't',
            Type::Double => 'd',
            Type::String => 's',
            Type::ObjectPath => 'o',
            Type::Signature => 'g',
            Type::Variant => 'v',
            Type::Array(_) | Type::Dict(..) | Type::Struct(_) => return None,
        };
        Some(c)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Array(elem) => write!(f, "a{}", elem),
            Type::Dict(key, value) => write!(f, "a{{{}{}}}", key, value),
            Type::Struct(fields) => {
                write!(f, "(")?;
                for field in fields {
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
            basic => match basic.code() {
                Some(c) => write!(f, "{}", c),
                None => Ok(()),
            },
        }
    }
}

impl std::str::FromStr for Type {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Type::parse(s)
    }
}

/// Renders a sequence of types as a tuple tag, e.g. `(si)`.
pub fn tuple_signature(types: &[Type]) -> String {
    let mut out = String::from("(");
    for ty in types {
        out.push_str(&ty.to_string());
    }
    out.push(')');
    out
}

/// Counts the complete types in a signature string.
pub fn signature_len(signature: &str) -> Result<usize> {
    Type::parse_many(signature).map(|types| types.len())
}

/// Returns true if `signature` is a well-formed concatenation of complete types.
pub fn is_valid_signature(signature: &str) -> bool {
    Type::parse_many(signature).is_ok()
}

struct Parser<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, chars: src.chars().peekable() }
    }

    fn is_done(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn invalid(&self) -> Error {
        Error::InvalidSignature(self.src.to_string())
    }

    fn complete(&mut self, depth: usize) -> Result<Type> {
        if depth > MAX_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        let c = self.chars.next().ok_or_else(|| self.invalid())?;
        let ty = match c {
            'y' => Type::Byte,
            'b' => Type::Bool,
            'n' => Type::Int16,
            'q' => Type::UInt16,
            'i' => Type::Int32,
            'u' => Type::UInt32,
            'x' => Type::Int64,
            't' => Type::UInt64,
            'd' => Type::Double,
            's' => Type::String,
            'o' => Type::ObjectPath,
            'g' => Type::Signature,
            'v' => Type::Variant,
            'a' => {
                if self.chars.peek() == Some(&'{') {
                    self.chars.next();
                    let key = self.complete(depth + 1)?;
                    if !key.is_basic() {
                        return Err(self.invalid());
                    }
                    let value = self.complete(depth + 1)?;
                    if self.chars.next() != Some('}') {
                        return Err(self.invalid());
                    }
                    Type::Dict(Box::new(key), Box::new(value))
                } else {
                    Type::Array(Box::new(self.complete(depth + 1)?))
                }
            }
            '(' => {
                let mut fields = Vec::new();
                loop {
                    match self.chars.peek() {
                        Some(')') => {
                            self.chars.next();
                            break;
                        }
                        Some(_) => fields.push(self.complete(depth + 1)?),
                        None => return Err(self.invalid()),
                    }
                }
                Type::Struct(fields)
            }
            _ => return Err(self.invalid()),
        };
        Ok(ty)
    }
}
