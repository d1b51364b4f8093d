//! File-server hook table and dispatch framework.
//!
//! A file server implements [`FileServer`] for the operations it
//! supports — every method defaults to [`ErrorCode::NoSys`], which is
//! exactly what the requester sees for a hook the server left out —
//! and wraps it in an [`FsServer`], which owns the protocol: the mount
//! state machine, the node reference table, grant-mediated data
//! movement, and reply construction.

mod node;
mod server;

pub use node::NodeTable;
pub use server::{FsServer, MountState};

use shrew_abi::wire::{StatBuf, StatVfsBuf};
use shrew_abi::{ErrorCode, MountFlags};

/// Inode number, unique within one server.
pub type InodeNr = u64;

/// What a mount or lookup answers: enough for the requester to refer
/// to the node from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDetails {
    pub ino: InodeNr,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// One directory entry answered by [`FileServer::getdents`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: InodeNr,
    pub name: String,
}

/// Attribute change requested through `FS_CHMOD` or `FS_CHOWN`.
///
/// Ownership changes carry the already-masked mode: the framework
/// clears the set-id bits before the hook ever sees the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChstatRequest {
    /// Apply these mode bits.
    Mode(u32),
    /// Change ownership and apply the (set-id-stripped) mode.
    Owner { uid: u32, gid: u32, mode: u32 },
}

/// The file-server operation table.
///
/// Implement the operations the server supports; the rest answer
/// [`ErrorCode::NoSys`] on the wire.
pub trait FileServer: Send {
    /// Read the superblock of `device` and answer the root node.
    /// Runs at most once per mount; the framework rejects overlong
    /// labels and repeated mounts before calling this.
    fn readsuper(
        &mut self,
        label: &str,
        device: u64,
        flags: MountFlags,
    ) -> Result<NodeDetails, ErrorCode> {
        let _ = (label, device, flags);
        Err(ErrorCode::NoSys)
    }

    /// Release backing state on unmount. The unmount itself cannot
    /// fail; an error here is logged and ignored.
    fn unmount(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }

    /// Veto hook for marking `ino` as a mount point. The framework has
    /// already checked that the node is a non-special directory and
    /// not already a mount point.
    fn mountpoint(&mut self, ino: InodeNr) -> Result<(), ErrorCode> {
        let _ = ino;
        Ok(())
    }

    /// Resolve `name` within directory `dir`.
    fn lookup(&mut self, dir: InodeNr, name: &str) -> Result<NodeDetails, ErrorCode> {
        let _ = (dir, name);
        Err(ErrorCode::NoSys)
    }

    /// Directory entries of `ino` starting at entry index `pos`.
    fn getdents(&mut self, ino: InodeNr, pos: u64) -> Result<Vec<DirEntry>, ErrorCode> {
        let _ = (ino, pos);
        Err(ErrorCode::NoSys)
    }

    /// Read file bytes into `buf`; short reads are fine.
    fn read(&mut self, ino: InodeNr, pos: u64, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        let _ = (ino, pos, buf);
        Err(ErrorCode::NoSys)
    }

    /// Write file bytes from `data`; short writes are fine.
    fn write(&mut self, ino: InodeNr, pos: u64, data: &[u8]) -> Result<usize, ErrorCode> {
        let _ = (ino, pos, data);
        Err(ErrorCode::NoSys)
    }

    /// Truncate or extend to `size`.
    fn trunc(&mut self, ino: InodeNr, size: u64) -> Result<(), ErrorCode> {
        let _ = (ino, size);
        Err(ErrorCode::NoSys)
    }

    /// Attributes of `ino`.
    fn stat(&mut self, ino: InodeNr) -> Result<StatBuf, ErrorCode> {
        let _ = ino;
        Err(ErrorCode::NoSys)
    }

    /// Filesystem-wide statistics.
    fn statvfs(&mut self) -> Result<StatVfsBuf, ErrorCode> {
        Err(ErrorCode::NoSys)
    }

    /// Apply an attribute change and answer the resulting mode bits.
    /// Backs both `FS_CHMOD` and `FS_CHOWN`.
    fn chstat(&mut self, ino: InodeNr, request: ChstatRequest) -> Result<u32, ErrorCode> {
        let _ = (ino, request);
        Err(ErrorCode::NoSys)
    }

    /// Create a hard link to `ino` named `name` under `dir`.
    fn link(&mut self, dir: InodeNr, name: &str, ino: InodeNr) -> Result<(), ErrorCode> {
        let _ = (dir, name, ino);
        Err(ErrorCode::NoSys)
    }

    /// Remove the entry `name` from `dir`.
    fn unlink(&mut self, dir: InodeNr, name: &str) -> Result<(), ErrorCode> {
        let _ = (dir, name);
        Err(ErrorCode::NoSys)
    }

    /// Move `old_name` in `old_dir` to `new_name` in `new_dir`.
    fn rename(
        &mut self,
        old_dir: InodeNr,
        old_name: &str,
        new_dir: InodeNr,
        new_name: &str,
    ) -> Result<(), ErrorCode> {
        let _ = (old_dir, old_name, new_dir, new_name);
        Err(ErrorCode::NoSys)
    }

    /// Target of the symlink `ino`.
    fn rdlink(&mut self, ino: InodeNr) -> Result<String, ErrorCode> {
        let _ = ino;
        Err(ErrorCode::NoSys)
    }

    /// Flush buffered state to the backing store.
    fn sync(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }
}
