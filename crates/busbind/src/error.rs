//! # Error Definitions
//!
//! Local failures (raised before any wire activity) and the errors that travel
//! on the wire as replies.
//!
//! ## Propagation
//!
//! - `ArgumentCount` / `ArgumentType` fail fast at the call site.
//! - `Transport` carries everything the connection reports, including
//!   [`MethodError`] replies from the remote side.
//! - On the service side every outcome becomes exactly one reply; a
//!   [`MethodError`] is what the remote caller sees.

use crate::transport;

/// Namespace prefixed to handler error names that have none.
pub const DEFAULT_ERROR_NAMESPACE: &str = "org.busbind.Error";

/// Reply sent when a handler returns something that cannot be packed.
pub const VALUE_ERROR: &str = "org.busbind.Error.ValueError";

pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";

#[derive(Debug)]
pub enum Error {
    /// Too few or too many arguments for a method.
    ArgumentCount { method: String, expected: usize, actual: usize },
    /// An argument of the wrong kind in a positional or trailing slot.
    ArgumentType { method: String, position: usize, found: String },
    /// The connection failed, or the remote side replied with an error.
    Transport(transport::Error),
    /// A value did not match its type tag.
    Codec(varpack::Error),
    /// The descriptor declares no member with this name.
    UnknownMember(String),
    /// The property exists but does not allow this kind of access.
    PropertyAccess { property: String, access: &'static str },
    /// The object is not bound to a connection.
    NotExported,
    /// The object is already bound to a connection.
    AlreadyExported,
    /// A reply's tags differ from the declared out-signature.
    ReplyMismatch { method: String, source: varpack::Error },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArgumentCount { method, expected, actual } => write!(
                f,
                "Wrong number of arguments passed for method: {}. Expected {}, got {}",
                method, expected, actual
            ),
            Self::ArgumentType { method, position, found } => write!(
                f,
                "Argument {} of method {} is {}. It should be a callback, flags or a cancellable",
                position, method, found
            ),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::UnknownMember(name) => write!(f, "No member named '{}'", name),
            Self::PropertyAccess { property, access } => {
                write!(f, "Property '{}' is not {}", property, access)
            }
            Self::NotExported => write!(f, "Object is not exported"),
            Self::AlreadyExported => write!(f, "Object is already exported"),
            Self::ReplyMismatch { method, source } => {
                write!(f, "Reply to '{}' does not match its out-signature: {}", method, source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) | Self::ReplyMismatch { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<varpack::Error> for Error {
    fn from(e: varpack::Error) -> Self {
        Self::Codec(e)
    }
}

impl Error {
    /// The wire error, if the remote side replied with one.
    pub fn remote(&self) -> Option<&MethodError> {
        match self {
            Self::Transport(transport::Error::Remote(e)) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A structured error with an explicit domain and code.
///
/// Returned from a handler, it is forwarded to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    pub domain: String,
    pub code: i32,
    pub message: String,
}

impl DomainError {
    pub fn new(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self { domain: domain.into(), code, message: message.into() }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for DomainError {}

/// A plain handler error with a name and a message.
///
/// Names without a `.` are placed under [`DEFAULT_ERROR_NAMESPACE`] on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedError {
    pub name: String,
    pub message: String,
}

impl NamedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }
}

impl std::fmt::Display for NamedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for NamedError {}

/// An error as carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodError {
    /// Forwarded verbatim from a handler.
    Domain(DomainError),
    /// A bus error name plus message.
    Named { name: String, message: String },
}

impl MethodError {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Named { name: name.into(), message: message.into() }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::named(UNKNOWN_METHOD, format!("Method {} is not implemented", method))
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::named(INVALID_ARGS, message)
    }

    /// Maps a handler failure onto the wire.
    ///
    /// A [`DomainError`] passes through unchanged. Otherwise the name of a
    /// [`NamedError`] (or `Error` for anything else) is namespaced unless it
    /// already contains a `.`.
    pub fn from_handler(err: &anyhow::Error) -> Self {
        if let Some(domain) = err.downcast_ref::<DomainError>() {
            return Self::Domain(domain.clone());
        }

        let (name, message) = match err.downcast_ref::<NamedError>() {
            Some(named) => (named.name.clone(), named.message.clone()),
            None => ("Error".to_string(), err.to_string()),
        };

        let name = if name.contains('.') {
            name
        } else {
            format!("{}.{}", DEFAULT_ERROR_NAMESPACE, name)
        };
        Self::Named { name, message }
    }

    /// The bus error name.
    pub fn name(&self) -> String {
        match self {
            Self::Domain(e) => format!("{}.Code{}", e.domain, e.code),
            Self::Named { name, .. } => name.clone(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Domain(e) => &e.message,
            Self::Named { message, .. } => message,
        }
    }
}

impl std::fmt::Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl std::error::Error for MethodError {}
