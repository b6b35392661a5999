//! # Configuration
//!
//! Call defaults applied by proxies. Trailing per-call arguments override them.

use std::time::Duration;

use crate::message::CallFlags;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// `None` uses the connection's default timeout.
    pub call_timeout: Option<Duration>,
    /// Flags used when a call does not pass its own.
    pub default_flags: CallFlags,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_default_flags(mut self, flags: CallFlags) -> Self {
        self.default_flags = flags;
        self
    }
}
