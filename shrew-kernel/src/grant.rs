//! Capability-scoped memory grants.
//!
//! A grantor exposes a bounded window of one of its buffers to exactly
//! one grantee, for an explicit direction, and can take the exposure
//! back at any time. Grant ids pack an arena index with a generation
//! counter, so a revoked id can never be replayed against the slot's
//! next occupant, and persistent mappings observe revocation on their
//! next access. Every access is re-validated against the record at
//! access time — bounds, direction, grantee — not just at setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use shrew_abi::{Endpoint, ErrorCode};
use spinning_top::Spinlock;

bitflags! {
    /// Directions a grant authorizes, from the grantee's point of view.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GrantAccess: u32 {
        /// Grantee may copy out of the window.
        const READ = 1 << 0;
        /// Grantee may copy into the window.
        const WRITE = 1 << 1;
    }
}

/// A byte region a process owns and may carve grants out of.
///
/// Stands in for the granted part of the owner's address space; both
/// the owner and (through grants) grantees reach the bytes through the
/// internal lock, never through raw pointers.
pub struct GrantBuffer {
    len: usize,
    data: Spinlock<Box<[u8]>>,
}

impl GrantBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            len,
            data: Spinlock::new(vec![0u8; len].into_boxed_slice()),
        })
    }

    /// Wrap existing bytes.
    pub fn from_vec(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            len: bytes.len(),
            data: Spinlock::new(bytes.into_boxed_slice()),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Owner-side read at an absolute offset.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), ErrorCode> {
        let end = offset.checked_add(out.len()).ok_or(ErrorCode::Invalid)?;
        if end > self.len {
            return Err(ErrorCode::Invalid);
        }
        out.copy_from_slice(&self.data.lock()[offset..end]);
        Ok(())
    }

    /// Owner-side write at an absolute offset.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), ErrorCode> {
        let end = offset.checked_add(bytes.len()).ok_or(ErrorCode::Invalid)?;
        if end > self.len {
            return Err(ErrorCode::Invalid);
        }
        self.data.lock()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy of the whole region.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().to_vec()
    }
}

/// Opaque grant capability: 16-bit arena index, 16-bit generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantId(u32);

impl GrantId {
    fn new(index: usize, generation: u16) -> Self {
        Self(((generation as u32) << 16) | index as u32)
    }

    /// Wire representation, as carried in message payloads.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild from the wire representation.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        (self.0 & 0xffff) as usize
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// One live grant.
pub(crate) struct GrantRecord {
    pub(crate) grantor: Endpoint,
    pub(crate) grantee: Endpoint,
    buffer: Arc<GrantBuffer>,
    /// Window within the buffer.
    start: usize,
    len: usize,
    access: GrantAccess,
    /// Shared with mappings derived from this grant; flips on revoke.
    revoked: Arc<AtomicBool>,
}

impl GrantRecord {
    /// Validate a grantee-side access and return the buffer plus the
    /// absolute offset of the requested sub-window.
    fn window(
        &self,
        grantee: Endpoint,
        offset: usize,
        len: usize,
        need: GrantAccess,
    ) -> Result<(Arc<GrantBuffer>, usize), ErrorCode> {
        if self.grantee != grantee {
            return Err(ErrorCode::Perm);
        }
        if !self.access.contains(need) {
            return Err(ErrorCode::Perm);
        }
        let end = offset.checked_add(len).ok_or(ErrorCode::Invalid)?;
        if end > self.len {
            return Err(ErrorCode::Invalid);
        }
        Ok((self.buffer.clone(), self.start + offset))
    }
}

struct GrantSlot {
    generation: u16,
    record: Option<GrantRecord>,
}

/// Arena of live grants.
pub(crate) struct GrantTable {
    slots: Vec<GrantSlot>,
}

impl GrantTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| GrantSlot {
                    generation: 0,
                    record: None,
                })
                .collect(),
        }
    }

    pub(crate) fn insert(
        &mut self,
        grantor: Endpoint,
        grantee: Endpoint,
        buffer: Arc<GrantBuffer>,
        start: usize,
        len: usize,
        access: GrantAccess,
    ) -> Result<GrantId, ErrorCode> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.record.is_none())
            .ok_or(ErrorCode::NoSpace)?;
        let slot = &mut self.slots[index];
        slot.record = Some(GrantRecord {
            grantor,
            grantee,
            buffer,
            start,
            len,
            access,
            revoked: Arc::new(AtomicBool::new(false)),
        });
        Ok(GrantId::new(index, slot.generation))
    }

    fn lookup(&self, id: GrantId) -> Result<&GrantRecord, ErrorCode> {
        let slot = self.slots.get(id.index()).ok_or(ErrorCode::Invalid)?;
        if slot.generation != id.generation() {
            return Err(ErrorCode::Invalid);
        }
        slot.record.as_ref().ok_or(ErrorCode::Invalid)
    }

    /// Look up a grant for a grantee-side operation, checking the
    /// grantor named in the request against the record.
    pub(crate) fn window(
        &self,
        grantor: Endpoint,
        id: GrantId,
        grantee: Endpoint,
        offset: usize,
        len: usize,
        need: GrantAccess,
    ) -> Result<(Arc<GrantBuffer>, usize), ErrorCode> {
        let record = self.lookup(id)?;
        if record.grantor != grantor {
            return Err(ErrorCode::Invalid);
        }
        record.window(grantee, offset, len, need)
    }

    /// Same as [`Self::window`], also handing out the record's
    /// revocation flag and access set for a persistent mapping.
    pub(crate) fn map_window(
        &self,
        grantor: Endpoint,
        id: GrantId,
        grantee: Endpoint,
        offset: usize,
        len: usize,
        writable: bool,
    ) -> Result<GrantMapping, ErrorCode> {
        let record = self.lookup(id)?;
        if record.grantor != grantor {
            return Err(ErrorCode::Invalid);
        }
        let need = if writable {
            GrantAccess::WRITE
        } else {
            GrantAccess::READ
        };
        let (buffer, start) = record.window(grantee, offset, len, need)?;
        Ok(GrantMapping {
            buffer,
            start,
            len,
            readable: record.access.contains(GrantAccess::READ),
            writable,
            revoked: record.revoked.clone(),
        })
    }

    pub(crate) fn revoke(&mut self, id: GrantId, by: Endpoint) -> Result<(), ErrorCode> {
        let slot = self.slots.get_mut(id.index()).ok_or(ErrorCode::Invalid)?;
        if slot.generation != id.generation() {
            return Err(ErrorCode::Invalid);
        }
        let record = slot.record.as_ref().ok_or(ErrorCode::Invalid)?;
        if record.grantor != by {
            return Err(ErrorCode::Perm);
        }
        record.revoked.store(true, Ordering::Release);
        slot.record = None;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    /// Revoke everything a detaching process granted.
    pub(crate) fn revoke_all_of(&mut self, grantor: Endpoint) {
        for slot in &mut self.slots {
            let owned = slot
                .record
                .as_ref()
                .is_some_and(|record| record.grantor == grantor);
            if owned {
                if let Some(record) = slot.record.take() {
                    record.revoked.store(true, Ordering::Release);
                }
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }
}

/// A persistent grantee-side window into a granted region.
///
/// Accesses are bounds-checked and re-checked against revocation every
/// time; a revoked mapping fails closed instead of reading stale state.
pub struct GrantMapping {
    buffer: Arc<GrantBuffer>,
    start: usize,
    len: usize,
    readable: bool,
    writable: bool,
    revoked: Arc<AtomicBool>,
}

impl GrantMapping {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize, len: usize) -> Result<usize, ErrorCode> {
        if self.revoked.load(Ordering::Acquire) {
            return Err(ErrorCode::Invalid);
        }
        let end = offset.checked_add(len).ok_or(ErrorCode::Invalid)?;
        if end > self.len {
            return Err(ErrorCode::Invalid);
        }
        Ok(self.start + offset)
    }

    /// Copy out of the mapped window.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), ErrorCode> {
        if !self.readable {
            return Err(ErrorCode::Perm);
        }
        let abs = self.check(offset, out.len())?;
        self.buffer.read(abs, out)
    }

    /// Copy into the mapped window.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), ErrorCode> {
        if !self.writable {
            return Err(ErrorCode::Perm);
        }
        let abs = self.check(offset, bytes.len())?;
        self.buffer.write(abs, bytes)
    }

    /// Explicit release; dropping the mapping does the same.
    pub fn unmap(self) {}
}
