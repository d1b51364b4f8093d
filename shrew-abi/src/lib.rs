//! Shared ABI definitions between the coordination core and every server.
//!
//! This crate contains the fixed-layout message envelope, the request and
//! reply type codes, the wire structs that travel through memory grants,
//! and the result-code enum that every reply carries. Both sides of every
//! exchange must agree on these definitions bit-for-bit.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[macro_use]
extern crate static_assertions;

pub mod codes;
pub mod endpoint;
pub mod errno;
pub mod message;
pub mod wire;

pub use codes::{MountFlags, OpenAccess};
pub use endpoint::Endpoint;
pub use errno::ErrorCode;
pub use message::{IpcStatus, MESSAGE_SIZE, Message, PAYLOAD_SIZE, Payload};
