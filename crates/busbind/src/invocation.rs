//! # Invocations
//!
//! One inbound request awaiting exactly one reply.
//!
//! Replying consumes the `Invocation`, so a second reply cannot be written. An
//! invocation dropped without a reply answers `NoReply` on its way out, so the
//! remote caller is never left waiting.

use tokio::sync::oneshot;
use varpack::Container;

use crate::error::MethodError;
use crate::error::NO_REPLY;

/// What the connection eventually receives for an invocation.
pub type Reply = std::result::Result<Container, MethodError>;

/// The connection's end of an invocation.
pub type ReplyReceiver = oneshot::Receiver<Reply>;

pub struct Invocation {
    sender: String,
    path: String,
    interface: String,
    member: String,
    tx: Option<oneshot::Sender<Reply>>,
}

impl Invocation {
    /// Creates an invocation and the receiver its reply will arrive on.
    ///
    /// Called by connections when a method call arrives for an exported object.
    pub fn new(
        sender: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let invocation = Self {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            tx: Some(tx),
        };
        (invocation, rx)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Replies with a packed result tuple.
    pub fn return_value(mut self, value: Container) {
        self.send(Ok(value));
    }

    pub fn return_error(mut self, error: MethodError) {
        self.send(Err(error));
    }

    /// Replies with a named bus error.
    pub fn return_dbus_error(self, name: impl Into<String>, message: impl Into<String>) {
        self.return_error(MethodError::named(name, message));
    }

    fn send(&mut self, reply: Reply) {
        if let Some(tx) = self.tx.take() {
            // The caller may have given up (timeout, cancellation); nothing to do then.
            let _ = tx.send(reply);
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(member = %self.member, path = %self.path, "invocation dropped without a reply");
            let message = format!("Method {} did not send a reply", self.member);
            self.send(Err(MethodError::named(NO_REPLY, message)));
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("sender", &self.sender)
            .field("path", &self.path)
            .field("interface", &self.interface)
            .field("member", &self.member)
            .field("replied", &self.tx.is_none())
            .finish()
    }
}
