//! Worker-pool block-driver dispatch.
//!
//! One receiver thread drains the port and routes each request to a
//! fixed pool of workers by minor number, so requests for one minor
//! always execute on the same worker in arrival order. Notifications
//! are handled inline by the receiver — the interrupt and alarm hooks
//! are non-blocking by contract. Workers send their replies
//! themselves, from their own threads.
//!
//! Cross-minor driver state is the driver's own concern; the
//! [`BlockDriver`] methods take `&self` precisely so implementations
//! reach for interior locks where minors share anything.

use std::sync::mpsc;
use std::thread;

use log::{debug, warn};
use shrew_abi::codes::{
    BDEV_CLOSE, BDEV_GATHER, BDEV_IOCTL, BDEV_OPEN, BDEV_READ, BDEV_REPLY, BDEV_SCATTER,
    BDEV_SHUTDOWN, BDEV_WRITE,
};
use shrew_abi::message::{BlockClose, BlockIoctl, BlockOpen, BlockReply, BlockTransfer};
use shrew_abi::{Endpoint, Message, endpoint};
use shrew_kernel::Port;

use super::task::{Outcome, TaskOptions, process_request};
use super::{BlockDriver, Minor};

/// Which minor a request addresses; used as the routing key.
fn minor_of(msg: &Message) -> Minor {
    match msg.m_type {
        BDEV_OPEN => msg.decode::<BlockOpen>().minor,
        BDEV_CLOSE => msg.decode::<BlockClose>().minor,
        BDEV_READ | BDEV_WRITE | BDEV_GATHER | BDEV_SCATTER => {
            msg.decode::<BlockTransfer>().minor
        }
        BDEV_IOCTL => msg.decode::<BlockIoctl>().minor,
        _ => 0,
    }
}

fn worker_loop<D: BlockDriver + ?Sized>(driver: &D, port: &Port, requests: mpsc::Receiver<Message>) {
    while let Ok(msg) = requests.recv() {
        match process_request(driver, port, &msg) {
            Outcome::Reply(to, reply) | Outcome::Shutdown(to, reply) => {
                if let Err(e) = port.send(to, &reply) {
                    warn!("driver reply to {} failed: {}", to, e);
                }
            }
        }
    }
}

/// Run the dispatch loop with `workers` worker threads until a
/// shutdown request or a dead port.
///
/// The shutdown reply is sent only after every queued request has been
/// answered and [`BlockDriver::cleanup`] has run.
pub fn driver_task_mt<D: BlockDriver + ?Sized>(
    driver: &D,
    port: &Port,
    workers: usize,
    options: TaskOptions,
) {
    assert!(workers > 0, "worker pool needs at least one worker");

    thread::scope(|scope| {
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::channel::<Message>();
            queues.push(tx);
            handles.push(scope.spawn(move || worker_loop(driver, port, rx)));
        }

        let shutdown_requester: Option<Endpoint> = loop {
            let (msg, status) = match port.receive(endpoint::ANY) {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!("driver receive failed: {}", e);
                    break None;
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

            if msg.m_type == BDEV_SHUTDOWN {
                break Some(msg.m_source);
            }

            let worker = (minor_of(&msg) as usize) % workers;
            debug!(
                "driver request {:#x} from {} -> worker {}",
                msg.m_type, msg.m_source, worker
            );
            if queues[worker].send(msg).is_err() {
                warn!("worker {} is gone; dropping request", worker);
            }
        };

        // Closing the queues lets each worker drain and exit; replies
        // for everything already routed go out before we clean up.
        drop(queues);
        for handle in handles {
            if handle.join().is_err() {
                warn!("driver worker panicked");
            }
        }
        driver.cleanup();

        if let Some(requester) = shutdown_requester {
            let done = Message::new(BDEV_REPLY, &BlockReply::new(0, 0));
            if let Err(e) = port.send(requester, &done) {
                warn!("driver shutdown reply to {} failed: {}", requester, e);
            }
        }
    });
}
