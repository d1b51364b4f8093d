//! Request and reply type codes, protocol limits, and flag sets.
//!
//! `m_type` values are grouped by request family so a dispatcher can
//! route on the code alone. Codes are never reused across families.

use bitflags::bitflags;

// =============================================================================
// Notifications
// =============================================================================

/// Delivered in place of a payload-bearing message when a coalesced
/// notification is consumed. The interesting datum is `m_source`.
pub const NOTIFY: i32 = 0x1000;

// =============================================================================
// Block-device requests (0x2000 family)
// =============================================================================

/// Open a minor device: payload [`crate::message::BlockOpen`].
pub const BDEV_OPEN: i32 = 0x2000;
/// Close a minor device: payload [`crate::message::BlockClose`].
pub const BDEV_CLOSE: i32 = 0x2001;
/// Read into one granted region: payload [`crate::message::BlockTransfer`].
pub const BDEV_READ: i32 = 0x2002;
/// Write from one granted region: payload [`crate::message::BlockTransfer`].
pub const BDEV_WRITE: i32 = 0x2003;
/// Vectored read; the grant names an on-wire iovec array.
pub const BDEV_GATHER: i32 = 0x2004;
/// Vectored write; the grant names an on-wire iovec array.
pub const BDEV_SCATTER: i32 = 0x2005;
/// Device-specific control: payload [`crate::message::BlockIoctl`].
pub const BDEV_IOCTL: i32 = 0x2006;
/// Run driver cleanup and leave the dispatch loop.
pub const BDEV_SHUTDOWN: i32 = 0x2007;
/// Reply to any of the above: payload [`crate::message::BlockReply`].
pub const BDEV_REPLY: i32 = 0x2080;

/// Most iovec entries one vectored transfer may carry.
pub const MAX_IOVEC_ENTRIES: usize = 64;

/// Ioctl request served by the dispatch framework itself: copy the
/// minor's [`crate::wire::GeometryBuf`] out through the grant.
pub const DIOC_GET_GEOMETRY: u32 = 1;

// =============================================================================
// File-server requests (0x3000 family)
// =============================================================================

/// Mount: read the superblock, answer with the root node.
pub const FS_READSUPER: i32 = 0x3000;
/// Unmount; always succeeds from the requester's point of view.
pub const FS_UNMOUNT: i32 = 0x3001;
/// Mark an inode as a mount point.
pub const FS_MOUNTPOINT: i32 = 0x3002;
/// Drop references to an inode.
pub const FS_PUTNODE: i32 = 0x3003;
/// Look up a name in a directory.
pub const FS_LOOKUP: i32 = 0x3004;
/// Read directory entries.
pub const FS_GETDENTS: i32 = 0x3005;
/// Read file data through a grant.
pub const FS_READ: i32 = 0x3006;
/// Write file data through a grant.
pub const FS_WRITE: i32 = 0x3007;
/// Truncate or extend a file.
pub const FS_TRUNC: i32 = 0x3008;
/// Copy an inode's attributes through a grant.
pub const FS_STAT: i32 = 0x3009;
/// Copy filesystem statistics through a grant.
pub const FS_STATVFS: i32 = 0x300a;
/// Change mode bits.
pub const FS_CHMOD: i32 = 0x300b;
/// Change ownership; clears the set-id bits.
pub const FS_CHOWN: i32 = 0x300c;
/// Create a hard link.
pub const FS_LINK: i32 = 0x300d;
/// Remove a directory entry.
pub const FS_UNLINK: i32 = 0x300e;
/// Move a directory entry.
pub const FS_RENAME: i32 = 0x300f;
/// Read a symlink target through a grant.
pub const FS_RDLINK: i32 = 0x3010;
/// Flush buffered state to the backing store.
pub const FS_SYNC: i32 = 0x3011;
/// Reply to any of the above: payload [`crate::message::FsReply`].
pub const FS_REPLY: i32 = 0x3080;

/// Longest mount label accepted by `FS_READSUPER`, in bytes.
pub const FS_LABEL_MAX: usize = 32;
/// Longest directory-entry name accepted on the wire, in bytes.
pub const FS_NAME_MAX: usize = 255;
/// Largest single read/write/getdents transfer, in bytes.
pub const FS_MAX_TRANSFER: usize = 64 * 1024;

// =============================================================================
// File mode bits
// =============================================================================

/// Mask selecting the file-type bits of a mode.
pub const MODE_TYPE_MASK: u32 = 0o170000;
/// Directory.
pub const MODE_DIR: u32 = 0o040000;
/// Regular file.
pub const MODE_REG: u32 = 0o100000;
/// Symbolic link.
pub const MODE_LINK: u32 = 0o120000;
/// Character device node.
pub const MODE_CHAR_DEV: u32 = 0o020000;
/// Block device node.
pub const MODE_BLOCK_DEV: u32 = 0o060000;
/// Set-user-id bit; cleared by ownership changes.
pub const MODE_SETUID: u32 = 0o4000;
/// Set-group-id bit; cleared by ownership changes.
pub const MODE_SETGID: u32 = 0o2000;
/// Permission bits.
pub const MODE_PERM_MASK: u32 = 0o7777;

/// Whether a mode names a directory.
pub const fn mode_is_dir(mode: u32) -> bool {
    mode & MODE_TYPE_MASK == MODE_DIR
}

/// Whether a mode names a character or block device node.
pub const fn mode_is_special(mode: u32) -> bool {
    let ty = mode & MODE_TYPE_MASK;
    ty == MODE_CHAR_DEV || ty == MODE_BLOCK_DEV
}

// =============================================================================
// Flag sets
// =============================================================================

bitflags! {
    /// Access requested when opening a minor device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenAccess: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// Options carried by a mount request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const READONLY = 1 << 0;
    }
}
