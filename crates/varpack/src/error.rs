//! # Error Definitions
//!
//! Every way a value can fail to match a type tag.

/// Failures while parsing type tags or packing values against them.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A type tag string is malformed (unknown code, unbalanced brackets, ...).
    InvalidSignature(String),
    /// A value does not fit the tag it is being packed against.
    TypeMismatch { expected: String, found: String },
    /// The number of values differs from the number of tags.
    ArityMismatch { expected: usize, found: usize },
    /// A container's tags differ from the tags the reader asked for.
    SignatureMismatch { expected: String, found: String },
    /// A value was packed into `v` but its type cannot be determined (e.g. an empty array).
    CannotInfer(String),
    /// A string packed as `o` is not a valid object path.
    InvalidObjectPath(String),
    /// Nesting exceeded `MAX_DEPTH`.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature(sig) => write!(f, "invalid type signature '{}'", sig),
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected '{}', found {}", expected, found)
            }
            Self::ArityMismatch { expected, found } => {
                write!(f, "arity mismatch: expected {} values, found {}", expected, found)
            }
            Self::SignatureMismatch { expected, found } => {
                write!(f, "signature mismatch: expected '{}', found '{}'", expected, found)
            }
            Self::CannotInfer(what) => write!(f, "cannot infer a wire type for {}", what),
            Self::InvalidObjectPath(path) => write!(f, "invalid object path '{}'", path),
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds the recursion limit"),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
