//! The rendezvous engine behind the IPC primitives.
//!
//! Every transition runs under the single table mutex in
//! [`KernelInner`]; threads that must block park on their slot's
//! condvar and re-examine the table when woken. A blocking send
//! deposits its message in the destination slot's queue together with a
//! ticket; the destination's receive consumes the entry and resolves
//! the ticket, which is what finally unblocks the sender. Direct
//! delivery short-circuits the queue when the destination is already
//! blocked in a matching receive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::MutexGuard;

use shrew_abi::codes::NOTIFY;
use shrew_abi::endpoint::ANY;
use shrew_abi::{Endpoint, ErrorCode, IpcStatus, Message};

use crate::kernel::KernelInner;

/// Observable state of one slot, driven only by the IPC primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcState {
    Runnable,
    /// Blocked delivering a message to the endpoint.
    SendBlocked(Endpoint),
    /// Blocked waiting for a message matching the filter.
    ReceiveBlocked(Endpoint),
    /// Request delivered; blocked waiting for the endpoint's reply.
    SendRecBlocked(Endpoint),
}

/// A message deposited in a destination's queue by a blocked sender.
struct QueuedSend {
    sender: Endpoint,
    msg: Message,
    /// Set for the request half of `sendrec`: consuming the entry moves
    /// the sender into the reply-wait phase instead of unblocking it.
    wants_reply: bool,
    ticket: u64,
}

/// Progress of one blocking send, observed by the sender's wait loop.
enum TicketState {
    /// Still queued at the destination.
    Pending,
    /// Consumed by a receive; a plain send is complete.
    Consumed,
    /// Consumed, and the sender is owed a reply.
    AwaitingReply,
    /// The reply arrived.
    Replied(Message),
    /// The destination went away first.
    Failed(ErrorCode),
}

/// One process slot.
pub(crate) struct Slot {
    pub(crate) live: bool,
    pub(crate) generation: i32,
    pub(crate) name: String,
    pub(crate) state: IpcState,
    /// Messages from senders currently blocked toward this slot.
    queue: VecDeque<QueuedSend>,
    /// Coalesced notification sources, delivery order preserved.
    notify_pending: VecDeque<Endpoint>,
    /// Direct delivery parking spot while this slot is receive-blocked.
    inbox: Option<(Message, IpcStatus)>,
    /// Failure to hand to this slot next time it checks for input.
    pending_error: Option<ErrorCode>,
    /// While in the reply-wait phase: the ticket to resolve and the
    /// endpoint whose send counts as the reply.
    awaiting_reply: Option<(u64, Endpoint)>,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            live: false,
            generation: 0,
            name: String::new(),
            state: IpcState::Runnable,
            queue: VecDeque::new(),
            notify_pending: VecDeque::new(),
            inbox: None,
            pending_error: None,
            awaiting_reply: None,
        }
    }

    /// Prepare the slot for a new occupant.
    pub(crate) fn reset(&mut self, name: &str) {
        self.live = true;
        self.name = name.to_owned();
        self.state = IpcState::Runnable;
        self.queue.clear();
        self.notify_pending.clear();
        self.inbox = None;
        self.pending_error = None;
        self.awaiting_reply = None;
    }
}

/// Everything the engine mutates, under one lock.
pub(crate) struct IpcTable {
    pub(crate) slots: Vec<Slot>,
    tickets: BTreeMap<u64, TicketState>,
    next_ticket: u64,
}

impl IpcTable {
    pub(crate) fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            tickets: BTreeMap::new(),
            next_ticket: 0,
        }
    }

    /// Map an endpoint to its slot index, rejecting reserved, out of
    /// range, dead, and stale values.
    fn resolve(&self, ep: Endpoint) -> Result<usize, ErrorCode> {
        if ep.is_reserved() {
            return Err(ErrorCode::DeadEndpoint);
        }
        let slot_index = ep.slot();
        let slot = self.slots.get(slot_index).ok_or(ErrorCode::DeadEndpoint)?;
        if !slot.live || slot.generation != ep.generation() {
            return Err(ErrorCode::DeadEndpoint);
        }
        Ok(slot_index)
    }

    /// Whether `dst_slot` is blocked in a receive that `src` satisfies.
    fn receive_ready(&self, dst_slot: usize, src: Endpoint) -> bool {
        match self.slots[dst_slot].state {
            IpcState::ReceiveBlocked(filter) => filter == ANY || filter == src,
            _ => false,
        }
    }

    /// Follow the chain of send-blocked destinations starting at `dst`;
    /// if it leads back to `src`, blocking would close a cycle.
    fn would_deadlock(&self, src: Endpoint, dst: Endpoint) -> bool {
        let mut cur = dst;
        for _ in 0..self.slots.len() {
            if cur == src {
                return true;
            }
            let next = match self.resolve(cur) {
                Ok(slot_index) => match self.slots[slot_index].state {
                    IpcState::SendBlocked(next) => next,
                    _ => return false,
                },
                Err(_) => return false,
            };
            cur = next;
        }
        false
    }

    fn ticket_alloc(&mut self) -> u64 {
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(id, TicketState::Pending);
        id
    }
}

/// Lock the table, surviving a peer thread that panicked mid-section.
pub(crate) fn lock_table(inner: &KernelInner) -> MutexGuard<'_, IpcTable> {
    inner
        .ipc
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wait_on<'a>(
    inner: &'a KernelInner,
    slot_index: usize,
    table: MutexGuard<'a, IpcTable>,
) -> MutexGuard<'a, IpcTable> {
    inner.wakeups[slot_index]
        .wait(table)
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deliver `msg` straight into `dst_slot`'s inbox and make it runnable.
/// Caller has already established that the slot is receive-ready.
fn deliver_direct(
    inner: &KernelInner,
    table: &mut IpcTable,
    dst_slot: usize,
    msg: Message,
    status: IpcStatus,
) {
    let slot = &mut table.slots[dst_slot];
    slot.inbox = Some((msg, status));
    slot.state = IpcState::Runnable;
    inner.wakeups[dst_slot].notify_all();
}

/// `send` and `sendnb`: deliver `msg` to `dst`, blocking (or not) until
/// the destination receives it.
pub(crate) fn send(
    inner: &KernelInner,
    me: Endpoint,
    dst: Endpoint,
    msg: &Message,
    blocking: bool,
) -> Result<(), ErrorCode> {
    let mut table = lock_table(inner);
    if dst == me {
        return Err(ErrorCode::Deadlock);
    }
    let dst_slot = table.resolve(dst)?;

    // The identity a receiver observes is always the sender's own.
    let mut stamped = *msg;
    stamped.m_source = me;

    // Reply path: the destination performed a sendrec toward us and is
    // waiting for exactly this message.
    if let Some((ticket, replier)) = table.slots[dst_slot].awaiting_reply {
        if replier == me {
            table.slots[dst_slot].awaiting_reply = None;
            table.tickets.insert(ticket, TicketState::Replied(stamped));
            inner.wakeups[dst_slot].notify_all();
            return Ok(());
        }
    }

    // Direct path: the destination is already blocked in a matching
    // receive.
    if table.receive_ready(dst_slot, me) {
        deliver_direct(inner, &mut table, dst_slot, stamped, IpcStatus::rendezvous());
        return Ok(());
    }

    if !blocking {
        return Err(ErrorCode::WouldBlock);
    }
    if table.would_deadlock(me, dst) {
        return Err(ErrorCode::Deadlock);
    }

    // Queue and block until the destination consumes the entry.
    let ticket = table.ticket_alloc();
    table.slots[dst_slot].queue.push_back(QueuedSend {
        sender: me,
        msg: stamped,
        wants_reply: false,
        ticket,
    });
    inner.wakeups[dst_slot].notify_all();

    let my_slot = me.slot();
    table.slots[my_slot].state = IpcState::SendBlocked(dst);
    loop {
        match table.tickets.get(&ticket) {
            Some(TicketState::Pending) => {}
            Some(TicketState::Consumed) => {
                table.tickets.remove(&ticket);
                table.slots[my_slot].state = IpcState::Runnable;
                return Ok(());
            }
            Some(TicketState::Failed(e)) => {
                let e = *e;
                table.tickets.remove(&ticket);
                table.slots[my_slot].state = IpcState::Runnable;
                return Err(e);
            }
            // AwaitingReply/Replied belong to sendrec tickets only.
            _ => unreachable!("plain send ticket in sendrec state"),
        }
        table = wait_on(inner, my_slot, table);
    }
}

/// `sendrec`: deliver `msg` to `dst`, then block until `dst` sends a
/// message back to the caller. Messages from other endpoints queue and
/// do not unblock the caller.
pub(crate) fn sendrec(
    inner: &KernelInner,
    me: Endpoint,
    dst: Endpoint,
    msg: &Message,
) -> Result<Message, ErrorCode> {
    let mut table = lock_table(inner);
    if dst == me {
        return Err(ErrorCode::Deadlock);
    }
    let dst_slot = table.resolve(dst)?;

    let mut stamped = *msg;
    stamped.m_source = me;

    // Does the destination happen to be blocked waiting for a message
    // from us — its own reply-wait toward us, or a matching receive?
    // Either way our request goes straight in and we move to the
    // reply-wait phase ourselves.
    let dst_awaits_us = matches!(
        table.slots[dst_slot].awaiting_reply,
        Some((_, replier)) if replier == me
    );

    let my_slot = me.slot();
    let ticket;
    if dst_awaits_us {
        if let Some((dst_ticket, _)) = table.slots[dst_slot].awaiting_reply.take() {
            table
                .tickets
                .insert(dst_ticket, TicketState::Replied(stamped));
        }
        inner.wakeups[dst_slot].notify_all();
        ticket = table.ticket_alloc();
        table.tickets.insert(ticket, TicketState::AwaitingReply);
        table.slots[my_slot].awaiting_reply = Some((ticket, dst));
        table.slots[my_slot].state = IpcState::SendRecBlocked(dst);
    } else if table.receive_ready(dst_slot, me) {
        // Request goes straight in; we move to the reply-wait phase.
        ticket = table.ticket_alloc();
        table.tickets.insert(ticket, TicketState::AwaitingReply);
        deliver_direct(inner, &mut table, dst_slot, stamped, IpcStatus::rendezvous());
        table.slots[my_slot].awaiting_reply = Some((ticket, dst));
        table.slots[my_slot].state = IpcState::SendRecBlocked(dst);
    } else {
        if table.would_deadlock(me, dst) {
            return Err(ErrorCode::Deadlock);
        }
        ticket = table.ticket_alloc();
        table.slots[dst_slot].queue.push_back(QueuedSend {
            sender: me,
            msg: stamped,
            wants_reply: true,
            ticket,
        });
        inner.wakeups[dst_slot].notify_all();
        table.slots[my_slot].state = IpcState::SendBlocked(dst);
    }

    loop {
        match table.tickets.get(&ticket) {
            Some(TicketState::Pending) => {}
            Some(TicketState::AwaitingReply) => {
                table.slots[my_slot].state = IpcState::SendRecBlocked(dst);
            }
            Some(TicketState::Replied(reply)) => {
                let reply = *reply;
                table.tickets.remove(&ticket);
                table.slots[my_slot].state = IpcState::Runnable;
                return Ok(reply);
            }
            Some(TicketState::Failed(e)) => {
                let e = *e;
                table.tickets.remove(&ticket);
                table.slots[my_slot].awaiting_reply = None;
                table.slots[my_slot].state = IpcState::Runnable;
                return Err(e);
            }
            Some(TicketState::Consumed) | None => {
                unreachable!("sendrec ticket resolved as plain send")
            }
        }
        table = wait_on(inner, my_slot, table);
    }
}

/// `receive`: block until a message or notification matching `filter`
/// arrives. Notifications are delivered ahead of queued senders.
pub(crate) fn receive(
    inner: &KernelInner,
    me: Endpoint,
    filter: Endpoint,
) -> Result<(Message, IpcStatus), ErrorCode> {
    let mut table = lock_table(inner);
    if filter != ANY {
        table.resolve(filter)?;
    }

    let my_slot = me.slot();
    loop {
        if let Some(delivery) = table.slots[my_slot].inbox.take() {
            table.slots[my_slot].state = IpcState::Runnable;
            return Ok(delivery);
        }
        if let Some(e) = table.slots[my_slot].pending_error.take() {
            table.slots[my_slot].state = IpcState::Runnable;
            return Err(e);
        }

        // Notifications first.
        let matching_notify = table.slots[my_slot]
            .notify_pending
            .iter()
            .position(|src| filter == ANY || *src == filter);
        if let Some(pos) = matching_notify {
            let src = table.slots[my_slot]
                .notify_pending
                .remove(pos)
                .expect("position comes from the same queue");
            let mut msg = Message::empty(NOTIFY);
            msg.m_source = src;
            table.slots[my_slot].state = IpcState::Runnable;
            return Ok((msg, IpcStatus::notify()));
        }

        // Then queued senders, oldest matching first.
        let matching_send = table.slots[my_slot]
            .queue
            .iter()
            .position(|entry| filter == ANY || entry.sender == filter);
        if let Some(pos) = matching_send {
            let entry = table.slots[my_slot]
                .queue
                .remove(pos)
                .expect("position comes from the same queue");
            let sender_slot = entry.sender.slot();
            if entry.wants_reply {
                // The sender is now owed a reply from us; it stays
                // blocked. Recording this here (not when the sender
                // wakes) lets our reply overtake its wake-up.
                table
                    .tickets
                    .insert(entry.ticket, TicketState::AwaitingReply);
                table.slots[sender_slot].awaiting_reply = Some((entry.ticket, me));
            } else {
                table.tickets.insert(entry.ticket, TicketState::Consumed);
            }
            inner.wakeups[sender_slot].notify_all();
            table.slots[my_slot].state = IpcState::Runnable;
            return Ok((entry.msg, IpcStatus::rendezvous()));
        }

        table.slots[my_slot].state = IpcState::ReceiveBlocked(filter);
        table = wait_on(inner, my_slot, table);
    }
}

/// `notify`: never blocks, carries no payload, coalesces per sender.
pub(crate) fn notify(inner: &KernelInner, me: Endpoint, dst: Endpoint) -> Result<(), ErrorCode> {
    let mut table = lock_table(inner);
    if dst == me {
        return Err(ErrorCode::Deadlock);
    }
    let dst_slot = table.resolve(dst)?;

    // Notifications bypass the queue only for a plain matching receive;
    // a sendrec caller must see nothing but its reply.
    if table.receive_ready(dst_slot, me) {
        let mut msg = Message::empty(NOTIFY);
        msg.m_source = me;
        deliver_direct(inner, &mut table, dst_slot, msg, IpcStatus::notify());
        return Ok(());
    }

    let pending = &mut table.slots[dst_slot].notify_pending;
    if !pending.contains(&me) {
        pending.push_back(me);
    }
    inner.wakeups[dst_slot].notify_all();
    Ok(())
}

/// Tear down a slot: every peer blocked toward it fails with
/// [`ErrorCode::DeadEndpoint`], its pending input is dropped, and its
/// grants are revoked.
pub(crate) fn detach(inner: &KernelInner, me: Endpoint) {
    let mut table = lock_table(inner);
    let my_slot = me.slot();
    {
        let slot = match table.slots.get_mut(my_slot) {
            Some(slot) if slot.live && slot.generation == me.generation() => slot,
            _ => return,
        };
        slot.live = false;
        log::debug!("detached {} ({})", slot.name, me);
    }

    // Senders blocked toward us.
    let orphans: Vec<QueuedSend> = table.slots[my_slot].queue.drain(..).collect();
    for entry in orphans {
        table
            .tickets
            .insert(entry.ticket, TicketState::Failed(ErrorCode::DeadEndpoint));
        inner.wakeups[entry.sender.slot()].notify_all();
    }
    table.slots[my_slot].notify_pending.clear();
    table.slots[my_slot].inbox = None;
    table.slots[my_slot].pending_error = None;

    // Peers waiting on us specifically: sendrec callers owed our reply,
    // and receivers filtered on our endpoint.
    let mut failed_tickets = Vec::new();
    for (slot_index, slot) in table.slots.iter_mut().enumerate() {
        if !slot.live {
            continue;
        }
        if let Some((ticket, replier)) = slot.awaiting_reply {
            if replier == me {
                slot.awaiting_reply = None;
                failed_tickets.push(ticket);
                inner.wakeups[slot_index].notify_all();
            }
        }
        if slot.state == IpcState::ReceiveBlocked(me) {
            slot.pending_error = Some(ErrorCode::DeadEndpoint);
            inner.wakeups[slot_index].notify_all();
        }
        // A coalesced notification from us will never be sent now.
        slot.notify_pending.retain(|src| *src != me);
    }
    for ticket in failed_tickets {
        table
            .tickets
            .insert(ticket, TicketState::Failed(ErrorCode::DeadEndpoint));
    }
    drop(table);

    inner.grants.lock().revoke_all_of(me);
}

/// Resolve an endpoint without performing any IPC; used by the grant
/// layer to validate grantees.
pub(crate) fn endpoint_exists(inner: &KernelInner, ep: Endpoint) -> bool {
    lock_table(inner).resolve(ep).is_ok()
}
