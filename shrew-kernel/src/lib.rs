//! In-process coordination core: endpoints, synchronous message passing,
//! and capability-scoped memory grants.
//!
//! A [`Kernel`] owns a fixed table of process slots. Each participating
//! thread attaches once and receives a [`Port`] — its endpoint handle —
//! through which it sends and receives fixed-size messages and
//! establishes grants over shared byte regions. All cross-thread data
//! movement is either a copied 64-byte envelope or a bounds-checked
//! access through a grant; there is no other sharing.

pub mod grant;
pub mod ipc;
pub mod kernel;
pub mod logging;
pub mod port;

pub use grant::{GrantAccess, GrantBuffer, GrantId, GrantMapping};
pub use kernel::{Kernel, KernelConfig};
pub use port::Port;
