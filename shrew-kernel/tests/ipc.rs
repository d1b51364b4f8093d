//! Rendezvous IPC semantics: source stamping, reply pairing,
//! notification coalescing, filters, deadlock and stale-endpoint
//! failures.

use std::thread;
use std::time::Duration;

use shrew_abi::endpoint::ANY;
use shrew_abi::{ErrorCode, Message, codes};
use shrew_kernel::{Kernel, KernelConfig};

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default())
}

#[test]
fn send_stamps_the_real_source() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");
    let receiver = kernel.attach("receiver").expect("slot available");

    let sender_ep = sender.endpoint();
    let receiver_ep = receiver.endpoint();

    let tx = thread::spawn(move || {
        // Try to impersonate the receiver itself; the stamp must win.
        let mut msg = Message::empty(0x42);
        msg.m_source = receiver_ep;
        sender.send(receiver_ep, &msg).expect("receiver is live");
    });

    let (msg, status) = receiver.receive(ANY).expect("sender is live");
    tx.join().expect("sender thread");

    assert!(!status.is_notify());
    assert_eq!(msg.m_type, 0x42);
    assert_eq!(msg.m_source, sender_ep);
}

#[test]
fn sendrec_gets_the_reply_not_a_bystander_message() {
    let kernel = kernel();
    let client = kernel.attach("client").expect("slot available");
    let server = kernel.attach("server").expect("slot available");
    let bystander = kernel.attach("bystander").expect("slot available");

    let client_ep = client.endpoint();
    let server_ep = server.endpoint();

    let server_thread = thread::spawn(move || {
        let (req, _) = server.receive(ANY).expect("client calls");
        assert_eq!(req.m_type, 0x11);
        // Give the bystander a chance to aim a message at the blocked
        // client before the reply goes out.
        thread::sleep(Duration::from_millis(50));
        let reply = Message::empty(0x22);
        server.send(req.m_source, &reply).expect("client waits");
    });

    let bystander_thread = thread::spawn(move || {
        let noise = Message::empty(0x33);
        // Blocks until the client finally receives it below.
        bystander.send(client_ep, &noise).expect("client receives later");
    });

    let mut msg = Message::empty(0x11);
    client.sendrec(server_ep, &mut msg).expect("server replies");
    assert_eq!(msg.m_type, 0x22, "reply must come from the server");
    assert_eq!(msg.m_source, server_ep);

    // The bystander's message queued instead of intercepting the reply.
    let (noise, _) = client.receive(ANY).expect("bystander is blocked");
    assert_eq!(noise.m_type, 0x33);

    server_thread.join().expect("server thread");
    bystander_thread.join().expect("bystander thread");
}

#[test]
fn notifications_coalesce_per_sender() {
    let kernel = kernel();
    let pinger = kernel.attach("pinger").expect("slot available");
    let target = kernel.attach("target").expect("slot available");

    let pinger_ep = pinger.endpoint();
    let target_ep = target.endpoint();

    // Three notifies before the target ever looks: one delivery.
    for _ in 0..3 {
        pinger.notify(target_ep).expect("target is live");
    }

    let (msg, status) = target.receive(ANY).expect("notification pending");
    assert!(status.is_notify());
    assert_eq!(msg.m_type, codes::NOTIFY);
    assert_eq!(msg.m_source, pinger_ep);

    // Nothing further is pending: a fresh rendezvous message must be
    // the next delivery, not a second notification.
    let follow_up = thread::spawn(move || {
        pinger.send(target_ep, &Message::empty(0x77)).expect("target receives");
    });
    let (msg, status) = target.receive(ANY).expect("message pending");
    follow_up.join().expect("pinger thread");
    assert!(!status.is_notify());
    assert_eq!(msg.m_type, 0x77);
}

#[test]
fn notifications_outrank_queued_senders() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");
    let pinger = kernel.attach("pinger").expect("slot available");
    let target = kernel.attach("target").expect("slot available");

    let pinger_ep = pinger.endpoint();
    let target_ep = target.endpoint();

    let sender_thread = thread::spawn(move || {
        sender.send(target_ep, &Message::empty(0x55)).expect("target receives");
    });
    // Wait until the sender is queued, then post the notification.
    thread::sleep(Duration::from_millis(50));
    pinger.notify(target_ep).expect("target is live");

    let (first, status) = target.receive(ANY).expect("input pending");
    assert!(status.is_notify(), "notification is delivered first");
    assert_eq!(first.m_source, pinger_ep);

    let (second, status) = target.receive(ANY).expect("sender queued");
    assert!(!status.is_notify());
    assert_eq!(second.m_type, 0x55);
    sender_thread.join().expect("sender thread");
}

#[test]
fn receive_filter_selects_among_queued_senders() {
    let kernel = kernel();
    let a = kernel.attach("a").expect("slot available");
    let b = kernel.attach("b").expect("slot available");
    let target = kernel.attach("target").expect("slot available");

    let b_ep = b.endpoint();
    let target_ep = target.endpoint();

    let a_thread = thread::spawn(move || {
        a.send(target_ep, &Message::empty(0xa)).expect("target receives");
    });
    thread::sleep(Duration::from_millis(50));
    let b_thread = thread::spawn(move || {
        b.send(target_ep, &Message::empty(0xb)).expect("target receives");
    });
    thread::sleep(Duration::from_millis(50));

    // B queued after A, but the filter picks it out first.
    let (msg, _) = target.receive(b_ep).expect("b is queued");
    assert_eq!(msg.m_type, 0xb);
    let (msg, _) = target.receive(ANY).expect("a is queued");
    assert_eq!(msg.m_type, 0xa);

    a_thread.join().expect("a thread");
    b_thread.join().expect("b thread");
}

#[test]
fn messages_from_one_sender_arrive_in_order() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");
    let receiver = kernel.attach("receiver").expect("slot available");
    let receiver_ep = receiver.endpoint();

    let tx = thread::spawn(move || {
        for seq in 0..16 {
            sender.send(receiver_ep, &Message::empty(seq)).expect("receiver is live");
        }
    });
    for seq in 0..16 {
        let (msg, _) = receiver.receive(ANY).expect("sender is live");
        assert_eq!(msg.m_type, seq);
    }
    tx.join().expect("sender thread");
}

#[test]
fn mutual_send_reports_deadlock_on_exactly_one_side() {
    let kernel = kernel();
    let a = kernel.attach("a").expect("slot available");
    let b = kernel.attach("b").expect("slot available");

    let a_ep = a.endpoint();
    let b_ep = b.endpoint();

    // Both sides send at each other; whichever blocks second must get
    // Deadlock, and it then drains the peer's message so both finish.
    let cross = move |mine: shrew_kernel::Port, peer| {
        match mine.send(peer, &Message::empty(0x1)) {
            Ok(()) => false,
            Err(ErrorCode::Deadlock) => {
                let (_, _) = mine.receive(ANY).expect("peer is blocked toward us");
                true
            }
            Err(other) => panic!("unexpected send failure: {}", other),
        }
    };

    let a_thread = thread::spawn(move || cross(a, b_ep));
    let b_thread = thread::spawn(move || cross(b, a_ep));
    let a_deadlocked = a_thread.join().expect("a thread");
    let b_deadlocked = b_thread.join().expect("b thread");

    assert!(
        a_deadlocked != b_deadlocked,
        "exactly one side must observe the cycle"
    );
}

#[test]
fn a_callee_may_call_back_into_its_caller() {
    let kernel = kernel();
    let client = kernel.attach("client").expect("slot available");
    let server = kernel.attach("server").expect("slot available");
    let server_ep = server.endpoint();

    let server_thread = thread::spawn(move || {
        let (req, _) = server.receive(ANY).expect("client calls");
        assert_eq!(req.m_type, 0x1);
        // Call back into the blocked caller: its reply-wait accepts any
        // message from us, so this cannot wedge.
        let mut msg = Message::empty(0x2);
        server.sendrec(req.m_source, &mut msg).expect("caller answers");
        assert_eq!(msg.m_type, 0x3);
    });

    let mut msg = Message::empty(0x1);
    client.sendrec(server_ep, &mut msg).expect("server replies");
    // What came back is the server's nested request.
    assert_eq!(msg.m_type, 0x2);
    client
        .send(server_ep, &Message::empty(0x3))
        .expect("server awaits its reply");

    server_thread.join().expect("server thread");
}

#[test]
fn send_to_self_is_a_deadlock() {
    let kernel = kernel();
    let lonely = kernel.attach("lonely").expect("slot available");
    let me = lonely.endpoint();
    assert_eq!(
        lonely.send(me, &Message::empty(0)),
        Err(ErrorCode::Deadlock)
    );
}

#[test]
fn sendnb_fails_instead_of_blocking() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");
    let idle = kernel.attach("idle").expect("slot available");

    assert_eq!(
        sender.sendnb(idle.endpoint(), &Message::empty(0)),
        Err(ErrorCode::WouldBlock)
    );
}

#[test]
fn stale_endpoints_fail_even_after_slot_reuse() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");

    let departed = kernel.attach("departed").expect("slot available");
    let departed_ep = departed.endpoint();
    drop(departed);

    assert_eq!(
        sender.send(departed_ep, &Message::empty(0)),
        Err(ErrorCode::DeadEndpoint)
    );

    // The slot comes back with a new generation; the old endpoint must
    // not reach the new occupant.
    let reused = kernel.attach("reused").expect("slot available");
    assert_eq!(reused.endpoint().slot(), departed_ep.slot());
    assert_ne!(reused.endpoint(), departed_ep);
    assert_eq!(
        sender.send(departed_ep, &Message::empty(0)),
        Err(ErrorCode::DeadEndpoint)
    );
}

#[test]
fn blocked_sender_wakes_when_destination_detaches() {
    let kernel = kernel();
    let sender = kernel.attach("sender").expect("slot available");
    let doomed = kernel.attach("doomed").expect("slot available");
    let doomed_ep = doomed.endpoint();

    let tx = thread::spawn(move || sender.send(doomed_ep, &Message::empty(0)));
    thread::sleep(Duration::from_millis(50));
    drop(doomed);

    assert_eq!(tx.join().expect("sender thread"), Err(ErrorCode::DeadEndpoint));
}

#[test]
fn blocked_sendrec_wakes_when_server_detaches_before_replying() {
    let kernel = kernel();
    let client = kernel.attach("client").expect("slot available");
    let server = kernel.attach("server").expect("slot available");
    let server_ep = server.endpoint();

    let server_thread = thread::spawn(move || {
        // Consume the request, then disappear without replying.
        let (_, _) = server.receive(ANY).expect("client calls");
        drop(server);
    });

    let mut msg = Message::empty(0x9);
    assert_eq!(
        client.sendrec(server_ep, &mut msg),
        Err(ErrorCode::DeadEndpoint)
    );
    server_thread.join().expect("server thread");
}

#[test]
fn table_exhaustion_is_reported() {
    let kernel = Kernel::new(KernelConfig {
        max_processes: 2,
        max_grants: 4,
    });
    let _a = kernel.attach("a").expect("slot available");
    let _b = kernel.attach("b").expect("slot available");
    assert!(matches!(kernel.attach("c"), Err(ErrorCode::NoSpace)));
}
