//! Block-driver operation table and dispatch loops.
//!
//! A driver implements [`BlockDriver`] — every method has a default
//! body answering [`ErrorCode::NoSys`], so a driver implements exactly
//! the operations it supports and unimplemented requests get a uniform
//! "not supported" reply rather than undefined behavior. The task
//! loops in [`task`] and [`mq`] turn incoming messages into calls
//! against the table and the return values back into replies.

mod task;

pub mod mq;

pub use mq::driver_task_mt;
pub use task::{Outcome, TaskOptions, driver_task, process_request};

use shrew_abi::{Endpoint, ErrorCode, Message, OpenAccess};
use shrew_kernel::{GrantId, Port};

/// Sub-device identifier a driver multiplexes within one process.
pub type Minor = u32;

/// Partition geometry answered by [`BlockDriver::geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceGeometry {
    /// First byte of the partition on the underlying device.
    pub base: u64,
    /// Partition size in bytes.
    pub size: u64,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
}

/// One element of a transfer: a grant naming the caller's data region
/// and its length in bytes.
#[derive(Debug, Clone, Copy)]
pub struct IoVec {
    pub grant: GrantId,
    pub size: u32,
}

/// The block-driver operation table.
///
/// Methods take `&self`: the single-threaded loop never calls them
/// concurrently, and the worker-pool loop guarantees per-minor
/// serialization but nothing across minors — drivers with cross-minor
/// state protect it themselves (interior locks).
pub trait BlockDriver: Send + Sync {
    /// Open a minor device. Must tolerate repeated opens of the same
    /// minor.
    fn open(&self, minor: Minor, access: OpenAccess) -> Result<(), ErrorCode> {
        let _ = (minor, access);
        Err(ErrorCode::NoSys)
    }

    /// Close a minor device. Called for every close request, including
    /// ones for minors that are already closed; must stay well-defined.
    fn close(&self, minor: Minor) -> Result<(), ErrorCode> {
        let _ = minor;
        Err(ErrorCode::NoSys)
    }

    /// Move data between the device and the caller's granted regions.
    ///
    /// Returns the number of bytes actually transferred; partial
    /// transfers are allowed and must be reflected in the return value.
    /// Data moves through `port` via safecopy against `caller`'s
    /// grants.
    fn transfer(
        &self,
        port: &Port,
        minor: Minor,
        do_write: bool,
        pos: u64,
        caller: Endpoint,
        iov: &[IoVec],
        flags: u32,
    ) -> Result<usize, ErrorCode> {
        let _ = (port, minor, do_write, pos, caller, iov, flags);
        Err(ErrorCode::NoSys)
    }

    /// Device-specific control. Unknown requests answer
    /// [`ErrorCode::NoTty`].
    fn ioctl(
        &self,
        port: &Port,
        minor: Minor,
        request: u32,
        caller: Endpoint,
        grant: GrantId,
    ) -> Result<usize, ErrorCode> {
        let _ = (port, minor, request, caller, grant);
        Err(ErrorCode::NoTty)
    }

    /// Partition geometry for a minor. Unknown minors must produce an
    /// error, never junk geometry.
    fn geometry(&self, minor: Minor) -> Result<DeviceGeometry, ErrorCode> {
        let _ = minor;
        Err(ErrorCode::NoSys)
    }

    /// Hardware interrupt notification. Must not block.
    fn intr(&self, port: &Port, source: Endpoint) {
        let _ = (port, source);
    }

    /// Timer notification. Must not block.
    fn alarm(&self, port: &Port) {
        let _ = port;
    }

    /// Catch-all for messages no named operation matches. The returned
    /// status is sent back; the default answers [`ErrorCode::Invalid`].
    fn other(&self, port: &Port, msg: &Message) -> Result<usize, ErrorCode> {
        let _ = (port, msg);
        Err(ErrorCode::Invalid)
    }

    /// Called once before the task loop exits; release device state and
    /// outstanding grants here.
    fn cleanup(&self) {}
}
