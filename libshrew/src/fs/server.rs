//! The file-server dispatch loop and per-request protocol handling.

use core::mem::size_of;

use log::{debug, warn};
use shrew_abi::codes::{
    FS_CHMOD, FS_CHOWN, FS_GETDENTS, FS_LABEL_MAX, FS_LINK, FS_LOOKUP, FS_MAX_TRANSFER,
    FS_MOUNTPOINT, FS_NAME_MAX, FS_PUTNODE, FS_RDLINK, FS_READ, FS_READSUPER, FS_RENAME, FS_REPLY,
    FS_STAT, FS_STATVFS, FS_SYNC, FS_TRUNC, FS_UNLINK, FS_UNMOUNT, FS_WRITE, MODE_LINK,
    MODE_SETGID, MODE_SETUID, MODE_TYPE_MASK, mode_is_dir, mode_is_special,
};
use shrew_abi::message::{
    FsChmod, FsChown, FsLink, FsLookup, FsNode, FsReadSuper, FsRename, FsReply, FsStat, FsTransfer,
    FsTrunc,
};
use shrew_abi::wire::DirentHeader;
use shrew_abi::{Endpoint, ErrorCode, Message, MountFlags, endpoint};
use shrew_kernel::{GrantId, Port};
use zerocopy::IntoBytes;

use super::{ChstatRequest, FileServer, InodeNr, NodeDetails, NodeTable};

/// Lifecycle of one mounted instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

/// Protocol wrapper around a [`FileServer`] implementation.
pub struct FsServer<S> {
    hooks: S,
    state: MountState,
    nodes: NodeTable,
    root: Option<InodeNr>,
}

impl<S: FileServer> FsServer<S> {
    pub fn new(hooks: S) -> Self {
        Self {
            hooks,
            state: MountState::Unmounted,
            nodes: NodeTable::new(),
            root: None,
        }
    }

    /// Current point in the mount lifecycle.
    pub fn state(&self) -> MountState {
        self.state
    }

    /// The root inode while mounted.
    pub fn root(&self) -> Option<InodeNr> {
        self.root
    }

    /// The wrapped hook implementation.
    pub fn hooks(&self) -> &S {
        &self.hooks
    }

    /// Serve requests until the instance is unmounted.
    ///
    /// Notifications are not this loop's business and are dropped with
    /// a debug line; servers that take part in liveness pings receive
    /// through [`crate::sef::SefContext`] and feed [`Self::process`]
    /// themselves.
    pub fn task(&mut self, port: &Port) {
        loop {
            let (msg, status) = match port.receive(endpoint::ANY) {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!("file server receive failed: {}", e);
                    return;
                }
            };
            if status.is_notify() {
                debug!("file server ignoring notification from {}", msg.m_source);
                continue;
            }
            let unmounting =
                msg.m_type == FS_UNMOUNT && self.state == MountState::Mounted;
            let reply = self.process(port, &msg);
            if let Err(e) = port.send(msg.m_source, &reply) {
                warn!("file server reply to {} failed: {}", msg.m_source, e);
            }
            if unmounting {
                return;
            }
        }
    }

    /// Route one request and build its `FS_REPLY`.
    pub fn process(&mut self, port: &Port, msg: &Message) -> Message {
        debug!("fs request {:#x} from {}", msg.m_type, msg.m_source);
        let caller = msg.m_source;
        let result = match msg.m_type {
            FS_READSUPER => self.do_readsuper(port, caller, msg.decode()),
            FS_UNMOUNT => self.do_unmount(),
            FS_MOUNTPOINT => self.do_mountpoint(msg.decode()),
            FS_PUTNODE => self.do_putnode(msg.decode()),
            FS_LOOKUP => self.do_lookup(port, caller, msg.decode()),
            FS_GETDENTS => self.do_getdents(port, caller, msg.decode()),
            FS_READ => self.do_read(port, caller, msg.decode()),
            FS_WRITE => self.do_write(port, caller, msg.decode()),
            FS_TRUNC => self.do_trunc(msg.decode()),
            FS_STAT => self.do_stat(port, caller, msg.decode()),
            FS_STATVFS => self.do_statvfs(port, caller, msg.decode()),
            FS_CHMOD => self.do_chmod(msg.decode()),
            FS_CHOWN => self.do_chown(msg.decode()),
            FS_LINK => self.do_link(port, caller, msg.decode()),
            FS_UNLINK => self.do_unlink(port, caller, msg.decode()),
            FS_RENAME => self.do_rename(port, caller, msg.decode()),
            FS_RDLINK => self.do_rdlink(port, caller, msg.decode()),
            FS_SYNC => self.do_sync(),
            _ => Err(ErrorCode::Invalid),
        };
        let reply = result.unwrap_or_else(|e| FsReply::with_status(e.to_code()));
        Message::new(FS_REPLY, &reply)
    }

    fn require_mounted(&self) -> Result<(), ErrorCode> {
        if self.state == MountState::Mounted {
            Ok(())
        } else {
            Err(ErrorCode::Invalid)
        }
    }

    /// A request naming an inode is only valid while the requester
    /// holds a reference to it.
    fn require_node(&self, ino: InodeNr) -> Result<(), ErrorCode> {
        self.require_mounted()?;
        if self.nodes.is_open(ino) {
            Ok(())
        } else {
            Err(ErrorCode::Invalid)
        }
    }

    fn require_dir(&self, ino: InodeNr) -> Result<(), ErrorCode> {
        self.require_node(ino)?;
        if mode_is_dir(self.nodes.mode(ino)?) {
            Ok(())
        } else {
            Err(ErrorCode::NotDir)
        }
    }

    /// Copy a name in through the requester's grant.
    fn read_name(
        &self,
        port: &Port,
        caller: Endpoint,
        grant: u32,
        len: u32,
    ) -> Result<String, ErrorCode> {
        let len = len as usize;
        if len == 0 || len > FS_NAME_MAX {
            return Err(ErrorCode::Invalid);
        }
        let mut raw = vec![0u8; len];
        port.safecopy_from(caller, GrantId::from_raw(grant), 0, &mut raw)?;
        String::from_utf8(raw).map_err(|_| ErrorCode::Invalid)
    }

    fn node_reply(details: NodeDetails) -> FsReply {
        let mut reply = FsReply::with_status(0);
        reply.ino = details.ino;
        reply.size = details.size;
        reply.mode = details.mode;
        reply.uid = details.uid;
        reply.gid = details.gid;
        reply
    }

    fn do_readsuper(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsReadSuper,
    ) -> Result<FsReply, ErrorCode> {
        if self.state != MountState::Unmounted {
            return Err(ErrorCode::Busy);
        }
        // Reject an oversized label before touching the grant — no
        // device or grant I/O happens for a malformed request.
        let label_len = req.label_len as usize;
        if label_len == 0 || label_len > FS_LABEL_MAX {
            return Err(ErrorCode::Invalid);
        }

        self.state = MountState::Mounting;
        let mut raw = vec![0u8; label_len];
        if port
            .safecopy_from(caller, GrantId::from_raw(req.label_grant), 0, &mut raw)
            .is_err()
        {
            self.state = MountState::Unmounted;
            return Err(ErrorCode::Invalid);
        }
        let label = match String::from_utf8(raw) {
            Ok(label) => label,
            Err(_) => {
                self.state = MountState::Unmounted;
                return Err(ErrorCode::Invalid);
            }
        };

        let flags = MountFlags::from_bits_truncate(req.flags);
        match self.hooks.readsuper(&label, req.device, flags) {
            Ok(details) => {
                self.nodes.open(details.ino, details.mode);
                self.root = Some(details.ino);
                self.state = MountState::Mounted;
                Ok(Self::node_reply(details))
            }
            Err(e) => {
                // Roll all the way back; a later mount starts fresh.
                self.state = MountState::Unmounted;
                Err(e)
            }
        }
    }

    fn do_unmount(&mut self) -> Result<FsReply, ErrorCode> {
        self.require_mounted()?;
        self.state = MountState::Unmounting;
        // Forced semantics: flush and release whatever we can, but the
        // unmount itself succeeds regardless.
        if let Err(e) = self.hooks.sync() {
            warn!("sync during unmount failed: {}", e);
        }
        if let Err(e) = self.hooks.unmount() {
            warn!("unmount hook failed: {}", e);
        }
        self.nodes.clear();
        self.root = None;
        self.state = MountState::Unmounted;
        Ok(FsReply::with_status(0))
    }

    fn do_mountpoint(&mut self, req: FsNode) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        if self.nodes.is_mountpoint(req.ino)? {
            return Err(ErrorCode::Busy);
        }
        let mode = self.nodes.mode(req.ino)?;
        if mode_is_special(mode) || !mode_is_dir(mode) {
            return Err(ErrorCode::NotDir);
        }
        self.hooks.mountpoint(req.ino)?;
        self.nodes.set_mountpoint(req.ino);
        Ok(FsReply::with_status(0))
    }

    fn do_putnode(&mut self, req: FsNode) -> Result<FsReply, ErrorCode> {
        self.require_mounted()?;
        self.nodes.put(req.ino, req.count)?;
        Ok(FsReply::with_status(0))
    }

    fn do_lookup(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsLookup,
    ) -> Result<FsReply, ErrorCode> {
        self.require_dir(req.dir_ino)?;
        let name = self.read_name(port, caller, req.name_grant, req.name_len)?;
        let details = self.hooks.lookup(req.dir_ino, &name)?;
        self.nodes.open(details.ino, details.mode);
        Ok(Self::node_reply(details))
    }

    fn do_getdents(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsTransfer,
    ) -> Result<FsReply, ErrorCode> {
        self.require_dir(req.ino)?;
        let capacity = (req.count as usize).min(FS_MAX_TRANSFER);
        let entries = self.hooks.getdents(req.ino, req.pos)?;

        let mut out = Vec::new();
        for entry in &entries {
            if entry.name.len() > FS_NAME_MAX {
                return Err(ErrorCode::Invalid);
            }
            let rec_len = DirentHeader::rec_len_for(entry.name.len());
            if out.len() + rec_len > capacity {
                break;
            }
            let header = DirentHeader {
                ino: entry.ino,
                rec_len: rec_len as u32,
                name_len: entry.name.len() as u32,
            };
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            let pad = rec_len - size_of::<DirentHeader>() - entry.name.len();
            out.resize(out.len() + pad, 0);
        }
        if !entries.is_empty() && out.is_empty() {
            // Buffer cannot hold even one entry.
            return Err(ErrorCode::Invalid);
        }
        if !out.is_empty() {
            port.safecopy_to(caller, GrantId::from_raw(req.grant), 0, &out)?;
        }
        let mut reply = FsReply::with_status(out.len() as i32);
        reply.count = out.len() as u32;
        Ok(reply)
    }

    fn do_read(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsTransfer,
    ) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        if mode_is_dir(self.nodes.mode(req.ino)?) {
            return Err(ErrorCode::IsDir);
        }
        let capacity = (req.count as usize).min(FS_MAX_TRANSFER);
        let mut buf = vec![0u8; capacity];
        let n = self.hooks.read(req.ino, req.pos, &mut buf)?.min(capacity);
        if n > 0 {
            port.safecopy_to(caller, GrantId::from_raw(req.grant), 0, &buf[..n])?;
        }
        let mut reply = FsReply::with_status(n as i32);
        reply.count = n as u32;
        Ok(reply)
    }

    fn do_write(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsTransfer,
    ) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        if mode_is_dir(self.nodes.mode(req.ino)?) {
            return Err(ErrorCode::IsDir);
        }
        let len = (req.count as usize).min(FS_MAX_TRANSFER);
        let mut data = vec![0u8; len];
        port.safecopy_from(caller, GrantId::from_raw(req.grant), 0, &mut data)?;
        let n = self.hooks.write(req.ino, req.pos, &data)?.min(len);
        let mut reply = FsReply::with_status(n as i32);
        reply.count = n as u32;
        Ok(reply)
    }

    fn do_trunc(&mut self, req: FsTrunc) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        if mode_is_dir(self.nodes.mode(req.ino)?) {
            return Err(ErrorCode::IsDir);
        }
        self.hooks.trunc(req.ino, req.size)?;
        Ok(FsReply::with_status(0))
    }

    fn do_stat(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsStat,
    ) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        let stat = self.hooks.stat(req.ino)?;
        port.safecopy_to(caller, GrantId::from_raw(req.grant), 0, stat.as_bytes())?;
        Ok(FsReply::with_status(0))
    }

    fn do_statvfs(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsStat,
    ) -> Result<FsReply, ErrorCode> {
        self.require_mounted()?;
        let stat = self.hooks.statvfs()?;
        port.safecopy_to(caller, GrantId::from_raw(req.grant), 0, stat.as_bytes())?;
        Ok(FsReply::with_status(0))
    }

    fn do_chmod(&mut self, req: FsChmod) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        let mode = self.hooks.chstat(req.ino, ChstatRequest::Mode(req.mode))?;
        self.nodes.set_mode(req.ino, mode);
        let mut reply = FsReply::with_status(0);
        reply.mode = mode;
        Ok(reply)
    }

    fn do_chown(&mut self, req: FsChown) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        // Ownership changes strip the set-id bits; the hook sees the
        // already-masked mode and cannot forget to apply the rule.
        let masked = self.nodes.mode(req.ino)? & !(MODE_SETUID | MODE_SETGID);
        let mode = self.hooks.chstat(
            req.ino,
            ChstatRequest::Owner {
                uid: req.uid,
                gid: req.gid,
                mode: masked,
            },
        )?;
        self.nodes.set_mode(req.ino, mode);
        let mut reply = FsReply::with_status(0);
        reply.mode = mode;
        Ok(reply)
    }

    fn do_link(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsLink,
    ) -> Result<FsReply, ErrorCode> {
        self.require_dir(req.dir_ino)?;
        self.require_node(req.ino)?;
        let name = self.read_name(port, caller, req.name_grant, req.name_len)?;
        self.hooks.link(req.dir_ino, &name, req.ino)?;
        Ok(FsReply::with_status(0))
    }

    fn do_unlink(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsLookup,
    ) -> Result<FsReply, ErrorCode> {
        self.require_dir(req.dir_ino)?;
        let name = self.read_name(port, caller, req.name_grant, req.name_len)?;
        self.hooks.unlink(req.dir_ino, &name)?;
        Ok(FsReply::with_status(0))
    }

    fn do_rename(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsRename,
    ) -> Result<FsReply, ErrorCode> {
        self.require_dir(req.old_dir)?;
        self.require_dir(req.new_dir)?;
        let old_name = self.read_name(port, caller, req.old_grant, req.old_len)?;
        let new_name = self.read_name(port, caller, req.new_grant, req.new_len)?;
        self.hooks
            .rename(req.old_dir, &old_name, req.new_dir, &new_name)?;
        Ok(FsReply::with_status(0))
    }

    fn do_rdlink(
        &mut self,
        port: &Port,
        caller: Endpoint,
        req: FsTransfer,
    ) -> Result<FsReply, ErrorCode> {
        self.require_node(req.ino)?;
        if self.nodes.mode(req.ino)? & MODE_TYPE_MASK != MODE_LINK {
            return Err(ErrorCode::Invalid);
        }
        let target = self.hooks.rdlink(req.ino)?;
        let bytes = target.as_bytes();
        let n = bytes.len().min(req.count as usize);
        if n > 0 {
            port.safecopy_to(caller, GrantId::from_raw(req.grant), 0, &bytes[..n])?;
        }
        let mut reply = FsReply::with_status(n as i32);
        reply.count = n as u32;
        Ok(reply)
    }

    fn do_sync(&mut self) -> Result<FsReply, ErrorCode> {
        self.require_mounted()?;
        self.hooks.sync()?;
        Ok(FsReply::with_status(0))
    }
}
