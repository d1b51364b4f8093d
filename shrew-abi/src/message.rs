//! The fixed-layout message envelope and its typed payloads.
//!
//! Every exchange copies exactly one [`Message`] between two address
//! spaces: a source endpoint, a type code, and 56 payload bytes. The
//! envelope is never pointer-passed, so its layout must be identical on
//! both sides; the size asserts below pin it. Typed payload structs are
//! each exactly [`PAYLOAD_SIZE`] bytes with explicit padding and convert
//! through the [`Payload`] trait.

use core::mem::size_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::endpoint::{self, Endpoint};

/// Total envelope size in bytes, identical across all processes.
pub const MESSAGE_SIZE: usize = 64;

/// Payload bytes following the source and type fields.
pub const PAYLOAD_SIZE: usize = 56;

/// One request or reply, copied between address spaces.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Message {
    /// Endpoint that sent this message. Stamped on delivery; a sender
    /// cannot forge it.
    pub m_source: Endpoint,
    /// Request or reply discriminant, from [`crate::codes`].
    pub m_type: i32,
    /// Raw payload bytes; interpret via [`Payload`] per `m_type`.
    pub payload: [u8; PAYLOAD_SIZE],
}

const_assert_eq!(MESSAGE_SIZE, size_of::<Message>());
assert_eq_size!([u64; MESSAGE_SIZE / 8], Message);

impl Message {
    /// Build a message with a typed payload. The source field is filled
    /// in at delivery time.
    pub fn new<P: Payload>(m_type: i32, payload: &P) -> Self {
        Self {
            m_source: endpoint::NONE,
            m_type,
            payload: payload.into_payload(),
        }
    }

    /// Build a message with an all-zero payload.
    pub fn empty(m_type: i32) -> Self {
        Self {
            m_source: endpoint::NONE,
            m_type,
            payload: [0; PAYLOAD_SIZE],
        }
    }

    /// Interpret the payload as one of the typed structs.
    pub fn decode<P: Payload>(&self) -> P {
        P::from_payload(&self.payload)
    }
}

/// Typed view over the 56 payload bytes.
///
/// Implementors must be `#[repr(C)]`, exactly [`PAYLOAD_SIZE`] bytes with
/// explicit padding fields; every implementation below carries a size
/// assert.
pub trait Payload: FromBytes + IntoBytes + Immutable + KnownLayout + Sized {
    fn from_payload(raw: &[u8; PAYLOAD_SIZE]) -> Self {
        Self::read_from_bytes(raw.as_slice()).expect("payload structs are PAYLOAD_SIZE bytes")
    }

    fn into_payload(&self) -> [u8; PAYLOAD_SIZE] {
        let mut raw = [0u8; PAYLOAD_SIZE];
        raw.copy_from_slice(self.as_bytes());
        raw
    }
}

/// Delivery status accompanying every received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcStatus(u32);

impl IpcStatus {
    const NOTIFY_FLAG: u32 = 1 << 0;

    /// Status of an ordinary rendezvous delivery.
    pub const fn rendezvous() -> Self {
        Self(0)
    }

    /// Status of a coalesced notification delivery.
    pub const fn notify() -> Self {
        Self(Self::NOTIFY_FLAG)
    }

    /// Whether this delivery was a notification rather than a message a
    /// sender is blocked on.
    pub const fn is_notify(self) -> bool {
        self.0 & Self::NOTIFY_FLAG != 0
    }
}

// =============================================================================
// Block-device payloads
// =============================================================================

/// Payload of `BDEV_OPEN`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BlockOpen {
    pub minor: u32,
    /// [`crate::codes::OpenAccess`] bits.
    pub access: u32,
    /// Echoed in the reply so callers can correlate.
    pub id: u32,
    pub _pad: [u8; 44],
}

impl BlockOpen {
    pub fn new(minor: u32, access: u32, id: u32) -> Self {
        Self {
            minor,
            access,
            id,
            _pad: [0; 44],
        }
    }
}

/// Payload of `BDEV_CLOSE`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BlockClose {
    pub minor: u32,
    /// Echoed in the reply so callers can correlate.
    pub id: u32,
    pub _pad: [u8; 48],
}

impl BlockClose {
    pub fn new(minor: u32, id: u32) -> Self {
        Self {
            minor,
            id,
            _pad: [0; 48],
        }
    }
}

/// Payload of `BDEV_READ`/`BDEV_WRITE`/`BDEV_GATHER`/`BDEV_SCATTER`.
///
/// For the single-grant forms, `grant` names the data region and `count`
/// is its length in bytes. For the vectored forms, `grant` names an
/// array of [`crate::wire::WireIoVec`] and `count` is the entry count.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BlockTransfer {
    pub pos: u64,
    pub minor: u32,
    pub grant: u32,
    pub count: u32,
    pub flags: u32,
    /// Echoed in the reply so callers can correlate.
    pub id: u32,
    pub _pad: [u8; 28],
}

impl BlockTransfer {
    pub fn new(minor: u32, pos: u64, grant: u32, count: u32, flags: u32, id: u32) -> Self {
        Self {
            pos,
            minor,
            grant,
            count,
            flags,
            id,
            _pad: [0; 28],
        }
    }
}

/// Payload of `BDEV_IOCTL`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BlockIoctl {
    pub minor: u32,
    pub request: u32,
    pub grant: u32,
    pub id: u32,
    pub _pad: [u8; 40],
}

impl BlockIoctl {
    pub fn new(minor: u32, request: u32, grant: u32, id: u32) -> Self {
        Self {
            minor,
            request,
            grant,
            id,
            _pad: [0; 40],
        }
    }
}

/// Payload of `BDEV_REPLY`: non-negative byte count or a negative
/// [`crate::ErrorCode`] wire code.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BlockReply {
    pub status: i64,
    /// The request id this reply answers.
    pub id: u32,
    pub _pad: [u8; 44],
}

impl BlockReply {
    pub fn new(status: i64, id: u32) -> Self {
        Self {
            status,
            id,
            _pad: [0; 44],
        }
    }
}

// =============================================================================
// File-server payloads
// =============================================================================

/// Payload of `FS_READSUPER`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsReadSuper {
    /// Backing device identifier, opaque to the framework.
    pub device: u64,
    /// Grant naming the mount label bytes in the requester.
    pub label_grant: u32,
    pub label_len: u32,
    /// [`crate::codes::MountFlags`] bits.
    pub flags: u32,
    pub _pad: [u8; 36],
}

impl FsReadSuper {
    pub fn new(device: u64, label_grant: u32, label_len: u32, flags: u32) -> Self {
        Self {
            device,
            label_grant,
            label_len,
            flags,
            _pad: [0; 36],
        }
    }
}

/// Payload of `FS_UNMOUNT`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsUnmount {
    pub flags: u32,
    pub _pad: [u8; 52],
}

impl FsUnmount {
    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            _pad: [0; 52],
        }
    }
}

/// Payload of `FS_MOUNTPOINT`, `FS_PUTNODE`, and `FS_SYNC`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsNode {
    pub ino: u64,
    /// Reference count to drop (`FS_PUTNODE` only).
    pub count: u32,
    pub _pad: [u8; 44],
}

impl FsNode {
    pub fn new(ino: u64, count: u32) -> Self {
        Self {
            ino,
            count,
            _pad: [0; 44],
        }
    }
}

/// Payload of `FS_LOOKUP` and `FS_UNLINK`: a directory and a granted name.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsLookup {
    pub dir_ino: u64,
    pub name_grant: u32,
    pub name_len: u32,
    pub _pad: [u8; 40],
}

impl FsLookup {
    pub fn new(dir_ino: u64, name_grant: u32, name_len: u32) -> Self {
        Self {
            dir_ino,
            name_grant,
            name_len,
            _pad: [0; 40],
        }
    }
}

/// Payload of `FS_READ`, `FS_WRITE`, `FS_GETDENTS`, and `FS_RDLINK`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsTransfer {
    pub ino: u64,
    pub pos: u64,
    pub grant: u32,
    pub count: u32,
    pub _pad: [u8; 32],
}

impl FsTransfer {
    pub fn new(ino: u64, pos: u64, grant: u32, count: u32) -> Self {
        Self {
            ino,
            pos,
            grant,
            count,
            _pad: [0; 32],
        }
    }
}

/// Payload of `FS_TRUNC`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsTrunc {
    pub ino: u64,
    pub size: u64,
    pub _pad: [u8; 40],
}

impl FsTrunc {
    pub fn new(ino: u64, size: u64) -> Self {
        Self {
            ino,
            size,
            _pad: [0; 40],
        }
    }
}

/// Payload of `FS_STAT` and `FS_STATVFS`: attributes are copied out
/// through the grant as a [`crate::wire::StatBuf`] /
/// [`crate::wire::StatVfsBuf`].
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsStat {
    pub ino: u64,
    pub grant: u32,
    pub _pad: [u8; 44],
}

impl FsStat {
    pub fn new(ino: u64, grant: u32) -> Self {
        Self {
            ino,
            grant,
            _pad: [0; 44],
        }
    }
}

/// Payload of `FS_CHMOD`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsChmod {
    pub ino: u64,
    pub mode: u32,
    pub _pad: [u8; 44],
}

impl FsChmod {
    pub fn new(ino: u64, mode: u32) -> Self {
        Self {
            ino,
            mode,
            _pad: [0; 44],
        }
    }
}

/// Payload of `FS_CHOWN`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsChown {
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub _pad: [u8; 40],
}

impl FsChown {
    pub fn new(ino: u64, uid: u32, gid: u32) -> Self {
        Self {
            ino,
            uid,
            gid,
            _pad: [0; 40],
        }
    }
}

/// Payload of `FS_LINK`: link `ino` under `dir_ino` with a granted name.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsLink {
    pub dir_ino: u64,
    pub ino: u64,
    pub name_grant: u32,
    pub name_len: u32,
    pub _pad: [u8; 32],
}

impl FsLink {
    pub fn new(dir_ino: u64, ino: u64, name_grant: u32, name_len: u32) -> Self {
        Self {
            dir_ino,
            ino,
            name_grant,
            name_len,
            _pad: [0; 32],
        }
    }
}

/// Payload of `FS_RENAME`: two directories, two granted names.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsRename {
    pub old_dir: u64,
    pub new_dir: u64,
    pub old_grant: u32,
    pub old_len: u32,
    pub new_grant: u32,
    pub new_len: u32,
    pub _pad: [u8; 24],
}

impl FsRename {
    pub fn new(
        old_dir: u64,
        old_grant: u32,
        old_len: u32,
        new_dir: u64,
        new_grant: u32,
        new_len: u32,
    ) -> Self {
        Self {
            old_dir,
            new_dir,
            old_grant,
            old_len,
            new_grant,
            new_len,
            _pad: [0; 24],
        }
    }
}

/// Payload of `FS_REPLY`.
///
/// `status` is zero / a byte count on success or a negative wire code.
/// Node-bearing replies (`FS_READSUPER`, `FS_LOOKUP`) also fill the
/// attribute fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FsReply {
    pub status: i32,
    pub _pad0: [u8; 4],
    pub ino: u64,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub count: u32,
    pub _pad: [u8; 16],
}

impl FsReply {
    /// A reply carrying only a status.
    pub fn with_status(status: i32) -> Self {
        Self {
            status,
            _pad0: [0; 4],
            ino: 0,
            size: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            count: 0,
            _pad: [0; 16],
        }
    }
}

impl Payload for BlockOpen {}
impl Payload for BlockClose {}
impl Payload for BlockTransfer {}
impl Payload for BlockIoctl {}
impl Payload for BlockReply {}
impl Payload for FsReadSuper {}
impl Payload for FsUnmount {}
impl Payload for FsNode {}
impl Payload for FsLookup {}
impl Payload for FsTransfer {}
impl Payload for FsTrunc {}
impl Payload for FsStat {}
impl Payload for FsChmod {}
impl Payload for FsChown {}
impl Payload for FsLink {}
impl Payload for FsRename {}
impl Payload for FsReply {}

const_assert_eq!(PAYLOAD_SIZE, size_of::<BlockOpen>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<BlockClose>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<BlockTransfer>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<BlockIoctl>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<BlockReply>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsReadSuper>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsUnmount>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsNode>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsLookup>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsTransfer>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsTrunc>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsStat>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsChmod>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsChown>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsLink>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsRename>());
const_assert_eq!(PAYLOAD_SIZE, size_of::<FsReply>());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn payload_round_trip() {
        let req = BlockTransfer::new(3, 4096, 17, 512, 0, 99);
        let msg = Message::new(codes::BDEV_READ, &req);
        let back: BlockTransfer = msg.decode();
        assert_eq!(back.minor, 3);
        assert_eq!(back.pos, 4096);
        assert_eq!(back.grant, 17);
        assert_eq!(back.count, 512);
        assert_eq!(back.id, 99);
    }

    #[test]
    fn envelope_survives_byte_copy() {
        let msg = Message::new(codes::FS_TRUNC, &FsTrunc::new(5, 1024));
        let mut raw = [0u8; MESSAGE_SIZE];
        raw.copy_from_slice(zerocopy::IntoBytes::as_bytes(&msg));
        let back = Message::read_from_bytes(&raw[..]).expect("exact size");
        assert_eq!(back, msg);
    }

    #[test]
    fn empty_payload_is_zeroed() {
        let msg = Message::empty(codes::NOTIFY);
        assert!(msg.payload.iter().all(|&b| b == 0));
    }
}
