//! Single-threaded block-driver dispatch.
//!
//! The loop blocks in `receive`, routes notifications to the interrupt
//! and alarm hooks, and turns every other message into one operation
//! call plus one `BDEV_REPLY`.

use core::mem::size_of;

use log::{debug, warn};
use shrew_abi::codes::{
    BDEV_CLOSE, BDEV_GATHER, BDEV_IOCTL, BDEV_OPEN, BDEV_READ, BDEV_REPLY, BDEV_SCATTER,
    BDEV_SHUTDOWN, BDEV_WRITE, DIOC_GET_GEOMETRY, MAX_IOVEC_ENTRIES,
};
use shrew_abi::errno::status_from;
use shrew_abi::message::{BlockClose, BlockIoctl, BlockOpen, BlockReply, BlockTransfer};
use shrew_abi::wire::{GeometryBuf, WireIoVec};
use shrew_abi::{Endpoint, ErrorCode, Message, OpenAccess, endpoint};
use shrew_kernel::{GrantId, Port};
use zerocopy::{FromBytes, IntoBytes};

use super::{BlockDriver, IoVec};

/// Knobs for the dispatch loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    /// Notifications from this endpoint invoke [`BlockDriver::alarm`];
    /// all others invoke [`BlockDriver::intr`].
    pub alarm_source: Option<Endpoint>,
}

/// What the loop should do with a processed request.
pub enum Outcome {
    /// Send the reply and keep going.
    Reply(Endpoint, Message),
    /// Send the reply, run cleanup, and leave the loop.
    Shutdown(Endpoint, Message),
}

fn reply(to: Endpoint, status: i64, id: u32) -> Outcome {
    Outcome::Reply(to, Message::new(BDEV_REPLY, &BlockReply::new(status, id)))
}

/// Route one request message against the operation table and build the
/// reply. Shared by the single-threaded loop, the worker pool, and
/// tests that drive a driver directly.
pub fn process_request<D: BlockDriver + ?Sized>(driver: &D, port: &Port, msg: &Message) -> Outcome {
    let caller = msg.m_source;
    match msg.m_type {
        BDEV_OPEN => {
            let req: BlockOpen = msg.decode();
            let result = driver
                .open(req.minor, OpenAccess::from_bits_truncate(req.access))
                .map(|()| 0);
            reply(caller, status_from(result), req.id)
        }
        BDEV_CLOSE => {
            let req: BlockClose = msg.decode();
            let result = driver.close(req.minor).map(|()| 0);
            reply(caller, status_from(result), req.id)
        }
        BDEV_READ | BDEV_WRITE => {
            let req: BlockTransfer = msg.decode();
            let iov = [IoVec {
                grant: GrantId::from_raw(req.grant),
                size: req.count,
            }];
            let do_write = msg.m_type == BDEV_WRITE;
            let result = driver.transfer(port, req.minor, do_write, req.pos, caller, &iov, req.flags);
            reply(caller, status_from(result), req.id)
        }
        BDEV_GATHER | BDEV_SCATTER => {
            let req: BlockTransfer = msg.decode();
            let do_write = msg.m_type == BDEV_SCATTER;
            let result = fetch_iovec(port, caller, &req).and_then(|iov| {
                driver.transfer(port, req.minor, do_write, req.pos, caller, &iov, req.flags)
            });
            reply(caller, status_from(result), req.id)
        }
        BDEV_IOCTL => {
            let req: BlockIoctl = msg.decode();
            let grant = GrantId::from_raw(req.grant);
            let result = match req.request {
                DIOC_GET_GEOMETRY => get_geometry(driver, port, caller, grant, req.minor),
                _ => driver.ioctl(port, req.minor, req.request, caller, grant),
            };
            reply(caller, status_from(result), req.id)
        }
        BDEV_SHUTDOWN => Outcome::Shutdown(
            caller,
            Message::new(BDEV_REPLY, &BlockReply::new(0, 0)),
        ),
        _ => {
            let result = driver.other(port, msg);
            reply(caller, status_from(result), 0)
        }
    }
}

/// Copy the caller's on-wire iovec array in through its grant.
fn fetch_iovec(port: &Port, caller: Endpoint, req: &BlockTransfer) -> Result<Vec<IoVec>, ErrorCode> {
    let count = req.count as usize;
    if count == 0 || count > MAX_IOVEC_ENTRIES {
        return Err(ErrorCode::Invalid);
    }
    let mut raw = vec![0u8; count * size_of::<WireIoVec>()];
    port.safecopy_from(caller, GrantId::from_raw(req.grant), 0, &mut raw)?;

    let mut iov = Vec::with_capacity(count);
    for chunk in raw.chunks_exact(size_of::<WireIoVec>()) {
        let entry = WireIoVec::read_from_bytes(chunk).expect("chunk is exactly one entry");
        if entry.size == 0 {
            return Err(ErrorCode::Invalid);
        }
        iov.push(IoVec {
            grant: GrantId::from_raw(entry.grant),
            size: entry.size,
        });
    }
    Ok(iov)
}

/// Serve the geometry ioctl from the driver's geometry hook: unknown
/// minors come back as the hook's error, never as junk data.
fn get_geometry<D: BlockDriver + ?Sized>(
    driver: &D,
    port: &Port,
    caller: Endpoint,
    grant: GrantId,
    minor: u32,
) -> Result<usize, ErrorCode> {
    let geometry = driver.geometry(minor)?;
    let buf = GeometryBuf {
        base: geometry.base,
        size: geometry.size,
        cylinders: geometry.cylinders,
        heads: geometry.heads,
        sectors: geometry.sectors,
        _pad: 0,
    };
    port.safecopy_to(caller, grant, 0, buf.as_bytes())?;
    Ok(size_of::<GeometryBuf>())
}

/// Run the dispatch loop until a shutdown request or a dead port.
pub fn driver_task<D: BlockDriver + ?Sized>(driver: &D, port: &Port, options: TaskOptions) {
    loop {
        let (msg, status) = match port.receive(endpoint::ANY) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("driver receive failed: {}", e);
                driver.cleanup();
                return;
            }
        };

        if status.is_notify() {
            if options.alarm_source == Some(msg.m_source) {
                driver.alarm(port);
            } else {
                driver.intr(port, msg.m_source);
            }
            continue;
        }

        debug!("driver request {:#x} from {}", msg.m_type, msg.m_source);
        match process_request(driver, port, &msg) {
            Outcome::Reply(to, reply) => {
                if let Err(e) = port.send(to, &reply) {
                    warn!("driver reply to {} failed: {}", to, e);
                }
            }
            Outcome::Shutdown(to, reply) => {
                driver.cleanup();
                if let Err(e) = port.send(to, &reply) {
                    warn!("driver shutdown reply to {} failed: {}", to, e);
                }
                return;
            }
        }
    }
}
