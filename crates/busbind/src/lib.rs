//! # Busbind
//!
//! Proxy and exported-object bindings for bus-style RPC, driven by parsed
//! interface descriptors.
//!
//! ## Philosophy
//!
//! - **Descriptors Drive Everything**: A [`Proxy`] and an [`ExportedObject`] are
//!   both built from one shared [`InterfaceDescriptor`]. Nothing is installed
//!   globally; every binding is an explicit value.
//! - **Fail Before The Wire**: Argument count and type errors are raised at the
//!   call site, before the connection sees anything.
//! - **Every Call Gets One Reply**: On the service side each inbound call ends in
//!   exactly one reply, even when a handler fails, returns garbage, or drops its
//!   [`Invocation`].
//!
//! ## Layout
//!
//! - [`descriptor`]: interfaces, members and the synthesized member table.
//! - [`marshal`]: argument lists, packing, sync and async calls.
//! - [`proxy`]: the consumer side (calls, property cache, signals).
//! - [`export`]: the service side (dispatch, property hooks, emission).
//! - [`transport`]: the [`Connection`] the two sides talk through.
//! - [`loopback`]: an in-process [`Connection`].

pub mod config;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod implementation;
pub mod invocation;
pub mod logging;
pub mod loopback;
pub mod marshal;
pub mod message;
pub mod proxy;
pub mod signal;
pub mod transport;

#[cfg(test)]
mod tests;

pub use crate::config::Config;

pub use crate::descriptor::Access;
pub use crate::descriptor::CallMode;
pub use crate::descriptor::InterfaceDescriptor;
pub use crate::descriptor::Member;

pub use crate::error::DomainError;
pub use crate::error::Error;
pub use crate::error::MethodError;
pub use crate::error::NamedError;
pub use crate::error::Result;

pub use crate::export::ExportedObject;
pub use crate::implementation::Implementation;
pub use crate::implementation::Return;
pub use crate::invocation::Invocation;

pub use crate::marshal::Arg;
pub use crate::marshal::AsyncResult;
pub use crate::marshal::CallId;
pub use crate::marshal::Convention;
pub use crate::marshal::Outcome;

pub use crate::message::CallFlags;
pub use crate::message::Target;

pub use crate::proxy::Proxy;
pub use crate::signal::SignalEvent;
pub use crate::signal::SignalHandlerId;

pub use crate::transport::Connection;
pub use crate::transport::ObjectHandler;

pub use tokio_util::sync::CancellationToken;
pub use varpack::Container;
pub use varpack::Value;
pub use varpack::Variant;
