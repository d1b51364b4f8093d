//! Server-side dispatch frameworks over the message-passing substrate.
//!
//! A server links this crate, implements one of the operation traits,
//! and hands it to the matching task loop:
//!
//! - [`driver::BlockDriver`] + [`driver::driver_task`] for block
//!   devices (or [`driver::driver_task_mt`] for a worker pool),
//! - [`fs::FileServer`] + [`fs::FsServer`] for file servers,
//! - [`sef::SefContext`] to take part in supervisor liveness pings.
//!
//! The loops own all envelope decoding, grant-mediated data movement,
//! and reply construction; trait implementations see plain types.

pub mod driver;
pub mod fs;
pub mod sef;
