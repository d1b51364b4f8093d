//! The per-endpoint handle.
//!
//! A `Port` is what `Kernel::attach` hands to a participating thread:
//! its endpoint identity plus the full IPC and grant surface. Dropping
//! the port detaches the endpoint — peers blocked toward it fail with
//! [`ErrorCode::DeadEndpoint`] and its grants are revoked.

use std::ops::Range;
use std::sync::Arc;

use shrew_abi::{Endpoint, ErrorCode, IpcStatus, Message};

use crate::grant::{GrantAccess, GrantBuffer, GrantId, GrantMapping};
use crate::ipc;
use crate::kernel::KernelInner;

pub struct Port {
    inner: Arc<KernelInner>,
    endpoint: Endpoint,
}

impl Port {
    pub(crate) fn new(inner: Arc<KernelInner>, endpoint: Endpoint) -> Self {
        Self { inner, endpoint }
    }

    /// This port's endpoint identity.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    // =========================================================================
    // IPC primitives
    // =========================================================================

    /// Deliver `msg` to `dst`, blocking until it is received.
    pub fn send(&self, dst: Endpoint, msg: &Message) -> Result<(), ErrorCode> {
        ipc::send(&self.inner, self.endpoint, dst, msg, true)
    }

    /// Deliver `msg` to `dst` only if it can be received right away.
    pub fn sendnb(&self, dst: Endpoint, msg: &Message) -> Result<(), ErrorCode> {
        ipc::send(&self.inner, self.endpoint, dst, msg, false)
    }

    /// Block until a message or notification matching `filter` arrives.
    /// Pass [`shrew_abi::endpoint::ANY`] to accept from anyone.
    pub fn receive(&self, filter: Endpoint) -> Result<(Message, IpcStatus), ErrorCode> {
        ipc::receive(&self.inner, self.endpoint, filter)
    }

    /// Deliver `msg` to `dst` and block until `dst` sends back; the
    /// reply replaces `*msg`. The reply observed is the one `dst` sent
    /// to this endpoint and nothing else.
    pub fn sendrec(&self, dst: Endpoint, msg: &mut Message) -> Result<(), ErrorCode> {
        *msg = ipc::sendrec(&self.inner, self.endpoint, dst, msg)?;
        Ok(())
    }

    /// Post a payload-free, coalescing wake-up to `dst`. Never blocks.
    pub fn notify(&self, dst: Endpoint) -> Result<(), ErrorCode> {
        ipc::notify(&self.inner, self.endpoint, dst)
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Expose `range` of `buffer` to `grantee` for the given directions.
    pub fn grant_access(
        &self,
        buffer: &Arc<GrantBuffer>,
        range: Range<usize>,
        grantee: Endpoint,
        access: GrantAccess,
    ) -> Result<GrantId, ErrorCode> {
        if access.is_empty() || range.start > range.end || range.end > buffer.len() {
            return Err(ErrorCode::Invalid);
        }
        if !ipc::endpoint_exists(&self.inner, grantee) {
            return Err(ErrorCode::DeadEndpoint);
        }
        self.inner.grants.lock().insert(
            self.endpoint,
            grantee,
            buffer.clone(),
            range.start,
            range.end - range.start,
            access,
        )
    }

    /// Take back a grant this endpoint created. Mappings derived from
    /// it fail on their next access.
    pub fn revoke(&self, id: GrantId) -> Result<(), ErrorCode> {
        self.inner.grants.lock().revoke(id, self.endpoint)
    }

    /// One-shot bounded copy out of a granted region. On any
    /// validation failure no bytes are copied.
    pub fn safecopy_from(
        &self,
        grantor: Endpoint,
        id: GrantId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), ErrorCode> {
        let (buffer, start) = self.inner.grants.lock().window(
            grantor,
            id,
            self.endpoint,
            offset,
            out.len(),
            GrantAccess::READ,
        )?;
        buffer.read(start, out)
    }

    /// One-shot bounded copy into a granted region.
    pub fn safecopy_to(
        &self,
        grantor: Endpoint,
        id: GrantId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), ErrorCode> {
        let (buffer, start) = self.inner.grants.lock().window(
            grantor,
            id,
            self.endpoint,
            offset,
            bytes.len(),
            GrantAccess::WRITE,
        )?;
        buffer.write(start, bytes)
    }

    /// Establish a persistent window over part of a granted region.
    pub fn safemap(
        &self,
        grantor: Endpoint,
        id: GrantId,
        offset: usize,
        len: usize,
        writable: bool,
    ) -> Result<GrantMapping, ErrorCode> {
        self.inner
            .grants
            .lock()
            .map_window(grantor, id, self.endpoint, offset, len, writable)
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        ipc::detach(&self.inner, self.endpoint);
    }
}
