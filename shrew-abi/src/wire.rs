//! Structs copied through grants rather than inside the envelope.
//!
//! These cross address spaces as raw bytes via safecopy, so they carry
//! the same fixed-layout discipline as the envelope payloads.

use core::mem::size_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// One entry of a vectored transfer request: a grant naming the data
/// region and its length in bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WireIoVec {
    pub grant: u32,
    pub size: u32,
}

const_assert_eq!(8, size_of::<WireIoVec>());

/// Inode attributes, copied out by `FS_STAT`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StatBuf {
    pub ino: u64,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
}

const_assert_eq!(32, size_of::<StatBuf>());

/// Filesystem statistics, copied out by `FS_STATVFS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StatVfsBuf {
    pub block_size: u32,
    pub _pad: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
}

const_assert_eq!(40, size_of::<StatVfsBuf>());

/// Partition geometry, copied out by the `DIOC_GET_GEOMETRY` ioctl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GeometryBuf {
    pub base: u64,
    pub size: u64,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub _pad: u32,
}

const_assert_eq!(32, size_of::<GeometryBuf>());

/// Fixed header preceding each name in a `FS_GETDENTS` buffer.
///
/// Entries are laid out as header, then `name_len` name bytes, then
/// zero padding up to the 8-byte aligned `rec_len`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DirentHeader {
    pub ino: u64,
    /// Total entry length including this header and padding.
    pub rec_len: u32,
    pub name_len: u32,
}

const_assert_eq!(16, size_of::<DirentHeader>());

impl DirentHeader {
    /// Entry length needed for a name of `name_len` bytes.
    pub const fn rec_len_for(name_len: usize) -> usize {
        (size_of::<DirentHeader>() + name_len + 7) & !7
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirent_rec_len_is_aligned() {
        assert_eq!(DirentHeader::rec_len_for(0), 16);
        assert_eq!(DirentHeader::rec_len_for(1), 24);
        assert_eq!(DirentHeader::rec_len_for(8), 24);
        assert_eq!(DirentHeader::rec_len_for(9), 32);
        assert_eq!(DirentHeader::rec_len_for(16), 32);
    }
}
