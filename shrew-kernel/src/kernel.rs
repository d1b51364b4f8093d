//! The kernel context object: slot table, grant table, wakeups.

use std::sync::{Arc, Condvar, Mutex};

use shrew_abi::{Endpoint, ErrorCode, endpoint};
use spinning_top::Spinlock;

use crate::grant::GrantTable;
use crate::ipc::{IpcTable, Slot};
use crate::port::Port;

/// Sizing knobs for a [`Kernel`].
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Number of process slots in the endpoint table.
    pub max_processes: usize,
    /// Number of concurrently live grants.
    pub max_grants: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: 64,
            max_grants: 256,
        }
    }
}

/// The coordination core. Cheap to clone handles out of via
/// [`Kernel::attach`]; all state lives behind the inner `Arc`.
pub struct Kernel {
    inner: Arc<KernelInner>,
}

/// Shared state behind every [`Port`].
pub(crate) struct KernelInner {
    /// Slot table plus everything the rendezvous engine mutates.
    /// One mutex: every IPC transition is a short critical section, and
    /// the blocking primitives park on the per-slot condvars below.
    pub(crate) ipc: Mutex<IpcTable>,
    /// One condvar per slot; a slot's thread parks here while blocked.
    pub(crate) wakeups: Vec<Condvar>,
    /// Grant arena, separate from the IPC lock: grant checks never
    /// block and must not contend with the rendezvous path.
    pub(crate) grants: Spinlock<GrantTable>,
}

impl Kernel {
    /// Create a kernel with the given table sizes.
    pub fn new(config: KernelConfig) -> Self {
        let slots = (0..config.max_processes).map(|_| Slot::new()).collect();
        let wakeups = (0..config.max_processes).map(|_| Condvar::new()).collect();
        Self {
            inner: Arc::new(KernelInner {
                ipc: Mutex::new(IpcTable::new(slots)),
                wakeups,
                grants: Spinlock::new(GrantTable::new(config.max_grants)),
            }),
        }
    }

    /// Claim a free slot and return its endpoint handle.
    ///
    /// The returned endpoint carries the slot's new generation; handles
    /// to previous occupants of the slot are stale from here on.
    pub fn attach(&self, name: &str) -> Result<Port, ErrorCode> {
        let mut table = crate::ipc::lock_table(&self.inner);
        let slot_index = table
            .slots
            .iter()
            .position(|slot| !slot.live)
            .ok_or(ErrorCode::NoSpace)?;

        // The top slot values are reserved for ANY/NONE and must never
        // become real endpoints.
        if slot_index >= (endpoint::SLOT_MASK - 1) as usize {
            return Err(ErrorCode::NoSpace);
        }

        let slot = &mut table.slots[slot_index];
        slot.generation += 1;
        slot.reset(name);
        let ep = Endpoint::new(slot_index, slot.generation);
        log::debug!("attached {} as {}", name, ep);
        drop(table);

        Ok(Port::new(self.inner.clone(), ep))
    }
}

impl Clone for Kernel {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

// Reserved filter values, re-exported for callers of `Port::receive`.
pub use endpoint::{ANY, NONE};
