//! # Connection Abstraction
//!
//! The interface to the transport that actually moves messages. Proxies and
//! exported objects only ever talk to a `dyn Connection`.
//!
//! ## Philosophy
//!
//! - **Typed, Not Framed**: A connection receives [`MethodCall`]s and
//!   [`SignalMessage`]s whose bodies are already packed. How they reach the wire
//!   is its own concern.
//! - **Awaiting Is Blocking**: A blocking call is `call(..).await` on the current
//!   task. The runtime keeps servicing other tasks (including the reply being
//!   awaited) in the meantime.
//! - **Cooperative Cancellation**: A cancelled token never preempts anything; it
//!   makes the pending call complete with [`Error::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use varpack::Container;
use varpack::Value;
use varpack::Variant;

use crate::error::MethodError;
use crate::invocation::Invocation;
use crate::message::CallFlags;
use crate::message::MethodCall;
use crate::message::SignalMessage;

/// Errors reported by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The connection is closed.
    Disconnected,
    /// No reply within the timeout.
    Timeout,
    /// The call's cancellation token fired before completion.
    Cancelled,
    /// The remote side replied with an error.
    Remote(MethodError),
    /// Any other transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Cancelled => write!(f, "Operation was cancelled"),
            Self::Remote(e) => write!(f, "Remote error: {}", e),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<MethodError> for Error {
    fn from(e: MethodError) -> Self {
        Self::Remote(e)
    }
}

impl From<varpack::Error> for Error {
    fn from(e: varpack::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle for a signal subscription.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct SubscriptionId(pub u64);

/// Handle for an object registration.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct RegistrationId(pub u64);

/// Receives every signal matching a [`SignalRule`].
pub type SignalSink = Arc<dyn Fn(SignalMessage) + Send + Sync>;

/// Which signals a subscription wants. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalRule {
    /// A unique or well-known name; the connection resolves ownership.
    pub sender: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl SignalRule {
    /// Checks everything except the sender, which needs name resolution.
    pub fn matches_route(&self, msg: &SignalMessage) -> bool {
        fn field(rule: &Option<String>, actual: &str) -> bool {
            rule.as_deref().is_none_or(|r| r == actual)
        }
        field(&self.path, &msg.path) && field(&self.interface, &msg.interface) && field(&self.member, &msg.member)
    }
}

/// The vtable a connection drives for an exported object.
///
/// `method_call` must eventually consume the [`Invocation`] by replying.
pub trait ObjectHandler: Send + Sync + 'static {
    fn method_call(&self, member: &str, body: Container, invocation: Invocation);

    /// `Ok(None)` means the property currently has no value.
    fn property_get(&self, name: &str) -> std::result::Result<Option<Variant>, MethodError>;

    /// All readable properties that have a value.
    fn property_get_all(&self) -> Vec<(String, Variant)>;

    fn property_set(&self, name: &str, value: Value) -> std::result::Result<(), MethodError>;
}

/// A bus connection.
///
/// Object-safe; shared as `Arc<dyn Connection>`.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    /// This connection's unique name.
    fn unique_name(&self) -> String;

    /// Sends a method call and waits for its reply body.
    ///
    /// # invariants
    /// - Completes exactly once: with the reply, a remote error, or a transport error.
    /// - Returns `Err(Error::Cancelled)` if `cancel` fires first.
    /// - `timeout == None` means the connection's default.
    async fn call(
        &self,
        call: MethodCall,
        flags: CallFlags,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<Container>;

    fn subscribe_signal(&self, rule: SignalRule, sink: SignalSink) -> SubscriptionId;

    /// Removing an unknown id is a no-op.
    fn unsubscribe_signal(&self, id: SubscriptionId);

    fn export(&self, path: &str, interface: &str, handler: Arc<dyn ObjectHandler>) -> Result<RegistrationId>;

    /// Unregistering an unknown id is a no-op.
    fn unexport(&self, id: RegistrationId);

    /// Broadcasts a signal; the connection fills in the sender.
    fn emit_signal(&self, signal: SignalMessage) -> Result<()>;
}
