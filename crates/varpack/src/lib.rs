//! # Varpack
//!
//! Typed value containers for bus-style RPC.
//!
//! ## Philosophy
//!
//! - **Tags Are Opaque To Callers**: Callers hand over tag strings (`s`, `a{sv}`,
//!   `(ii)`) and positional values; only this crate interprets the tags.
//! - **Pack Validates, Unpack Trusts**: Every check happens when building a
//!   [`Container`]. Unpacking never fails on a container this crate built.
//! - **No Wire Bytes**: A container is an in-memory tuple. Framing belongs to the
//!   transport that carries it.

pub mod codec;
pub mod error;
pub mod types;
pub mod value;

#[cfg(test)]
mod tests;

pub use codec::Container;
pub use codec::pack;
pub use codec::pack_str;
pub use codec::unpack;
pub use codec::unpack_as;
pub use error::Error;
pub use error::Result;
pub use types::Type;
pub use types::signature_len;
pub use types::tuple_signature;
pub use value::Value;
pub use value::Variant;
