//! Supervisor liveness pings.
//!
//! Every long-running server receives through a [`SefContext`] instead
//! of its raw port. The context consumes ping notifications from the
//! registered supervisor — answering them according to the installed
//! reply policy — so server dispatch code never sees them, and a
//! server cannot accidentally shadow the liveness protocol with its
//! own handling. A pong is a `notify` back at the supervisor, which is
//! how the supervisor distinguishes a live server from a wedged one.

use log::{debug, warn};
use shrew_abi::endpoint::ANY;
use shrew_abi::{Endpoint, ErrorCode, IpcStatus, Message};
use shrew_kernel::Port;

/// How to answer a supervisor ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingReply {
    /// Silently absorb the ping. The supervisor will conclude the
    /// server is wedged; only diagnostic servers want this.
    Ignore,
    /// Notify the supervisor back.
    #[default]
    Pong,
}

/// Startup hook run once before the first receive.
pub type FreshStartHook = Box<dyn FnMut(&Port) + Send>;

/// Wraps a port with the liveness-ping convention.
pub struct SefContext {
    port: Port,
    supervisor: Endpoint,
    ping_reply: PingReply,
    fresh_start: Option<FreshStartHook>,
    started: bool,
}

impl SefContext {
    /// Adopt `port` and treat notifications from `supervisor` as pings.
    pub fn new(port: Port, supervisor: Endpoint) -> Self {
        Self {
            port,
            supervisor,
            ping_reply: PingReply::default(),
            fresh_start: None,
            started: false,
        }
    }

    /// Install a ping reply policy.
    pub fn set_ping_reply(&mut self, reply: PingReply) {
        self.ping_reply = reply;
    }

    /// Install a hook that runs once, before the first receive.
    pub fn set_fresh_start(&mut self, hook: FreshStartHook) {
        self.fresh_start = Some(hook);
    }

    /// The wrapped port, for sending replies and creating grants.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Receive the next message that is not a supervisor ping.
    ///
    /// Pings are consumed and answered here; they always succeed from
    /// the supervisor's point of view and are never handed onward.
    pub fn receive(&mut self) -> Result<(Message, IpcStatus), ErrorCode> {
        if !self.started {
            self.started = true;
            if let Some(mut hook) = self.fresh_start.take() {
                hook(&self.port);
            }
        }
        loop {
            let (msg, status) = self.port.receive(ANY)?;
            if status.is_notify() && msg.m_source == self.supervisor {
                debug!("ping from supervisor {}", self.supervisor);
                match self.ping_reply {
                    PingReply::Pong => {
                        if let Err(e) = self.port.notify(self.supervisor) {
                            warn!("pong to {} failed: {}", self.supervisor, e);
                        }
                    }
                    PingReply::Ignore => {}
                }
                continue;
            }
            return Ok((msg, status));
        }
    }
}
