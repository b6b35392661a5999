//! # Messages
//!
//! The typed messages exchanged with a [`Connection`](crate::transport::Connection).
//! Framing and serialization are the connection's business.

use varpack::Container;

/// The standard properties interface.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Emitted on [`PROPERTIES_INTERFACE`] with body `(sa{sv}as)`.
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Identifies a remote object: service name, object path, interface name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
    pub path: String,
    pub interface: String,
}

impl Target {
    pub fn new(name: impl Into<String>, path: impl Into<String>, interface: impl Into<String>) -> Self {
        Self { name: name.into(), path: path.into(), interface: interface.into() }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.name, self.path, self.interface)
    }
}

/// Per-call flags, passed through to the connection untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CallFlags(pub u32);

impl CallFlags {
    pub const NONE: CallFlags = CallFlags(0);
    pub const NO_AUTO_START: CallFlags = CallFlags(1 << 0);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: CallFlags = CallFlags(1 << 1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CallFlags {
    type Output = CallFlags;

    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}

/// An outbound method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub body: Container,
}

impl MethodCall {
    pub fn new(target: &Target, member: impl Into<String>, body: Container) -> Self {
        Self {
            destination: target.name.clone(),
            path: target.path.clone(),
            interface: target.interface.clone(),
            member: member.into(),
            body,
        }
    }

    /// A call on the properties interface of `target`'s object.
    pub fn properties(target: &Target, member: impl Into<String>, body: Container) -> Self {
        Self {
            destination: target.name.clone(),
            path: target.path.clone(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: member.into(),
            body,
        }
    }
}

/// A broadcast signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Unique name of the emitting connection; filled in by the connection.
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    /// `None` for signals without arguments.
    pub body: Option<Container>,
}
