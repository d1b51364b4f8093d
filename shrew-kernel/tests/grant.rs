//! Grant semantics: bounds and direction checks at access time,
//! revocation, generation-checked ids, and grantor-exit cleanup.

use shrew_abi::ErrorCode;
use shrew_kernel::{GrantAccess, GrantBuffer, Kernel, KernelConfig};

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default())
}

#[test]
fn safecopy_round_trip_through_a_window() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::from_vec((0u8..=255).collect());
    let id = grantor
        .grant_access(
            &buffer,
            100..200,
            grantee.endpoint(),
            GrantAccess::READ | GrantAccess::WRITE,
        )
        .expect("table has room");

    // Offsets are relative to the window, not the buffer.
    let mut out = [0u8; 4];
    grantee
        .safecopy_from(grantor.endpoint(), id, 0, &mut out)
        .expect("in bounds");
    assert_eq!(out, [100, 101, 102, 103]);

    grantee
        .safecopy_to(grantor.endpoint(), id, 10, &[0xaa, 0xbb])
        .expect("in bounds and writable");
    let mut check = [0u8; 2];
    buffer.read(110, &mut check).expect("owner-side read");
    assert_eq!(check, [0xaa, 0xbb]);
}

#[test]
fn out_of_range_access_copies_nothing() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::new(256);
    let id = grantor
        .grant_access(&buffer, 100..200, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    // Window is 100 bytes; offset 50 + len 100 runs past the end.
    let sentinel = [0x5a; 100];
    let mut out = sentinel;
    assert_eq!(
        grantee.safecopy_from(grantor.endpoint(), id, 50, &mut out),
        Err(ErrorCode::Invalid)
    );
    assert_eq!(out, sentinel, "failed copies must not move any bytes");

    // The same sub-range must not map either.
    assert!(
        grantee
            .safemap(grantor.endpoint(), id, 50, 100, false)
            .is_err()
    );
}

#[test]
fn direction_is_enforced() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::new(64);
    let id = grantor
        .grant_access(&buffer, 0..64, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    assert_eq!(
        grantee.safecopy_to(grantor.endpoint(), id, 0, &[1, 2, 3]),
        Err(ErrorCode::Perm)
    );
    assert_eq!(
        grantee
            .safemap(grantor.endpoint(), id, 0, 16, true)
            .err(),
        Some(ErrorCode::Perm)
    );

    // Read direction still works.
    let mut out = [0u8; 8];
    grantee
        .safecopy_from(grantor.endpoint(), id, 0, &mut out)
        .expect("read is granted");
}

#[test]
fn only_the_named_grantee_may_use_a_grant() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");
    let interloper = kernel.attach("interloper").expect("slot available");

    let buffer = GrantBuffer::new(32);
    let id = grantor
        .grant_access(&buffer, 0..32, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    let mut out = [0u8; 4];
    assert_eq!(
        interloper.safecopy_from(grantor.endpoint(), id, 0, &mut out),
        Err(ErrorCode::Perm)
    );
}

#[test]
fn revocation_invalidates_live_mappings() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::from_vec(vec![7u8; 64]);
    let id = grantor
        .grant_access(&buffer, 0..64, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    let mapping = grantee
        .safemap(grantor.endpoint(), id, 0, 32, false)
        .expect("grant is live");
    let mut out = [0u8; 8];
    mapping.read(0, &mut out).expect("mapping is live");
    assert_eq!(out, [7u8; 8]);

    grantor.revoke(id).expect("grantor may revoke");

    assert_eq!(mapping.read(0, &mut out), Err(ErrorCode::Invalid));
}

#[test]
fn stale_ids_do_not_reach_a_reused_slot() {
    let kernel = Kernel::new(KernelConfig {
        max_processes: 8,
        // One grant slot: the second grant must reuse it.
        max_grants: 1,
    });
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::new(16);
    let old = grantor
        .grant_access(&buffer, 0..16, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");
    grantor.revoke(old).expect("grantor may revoke");

    let fresh = grantor
        .grant_access(&buffer, 0..16, grantee.endpoint(), GrantAccess::READ)
        .expect("slot was freed");
    assert_ne!(old, fresh);

    let mut out = [0u8; 4];
    assert_eq!(
        grantee.safecopy_from(grantor.endpoint(), old, 0, &mut out),
        Err(ErrorCode::Invalid)
    );
    grantee
        .safecopy_from(grantor.endpoint(), fresh, 0, &mut out)
        .expect("fresh grant works");
}

#[test]
fn grantor_writes_are_visible_through_the_grant() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::new(16);
    let id = grantor
        .grant_access(&buffer, 0..16, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    buffer.write(4, &[0xde, 0xad]).expect("owner-side write");

    let mut out = [0u8; 2];
    grantee
        .safecopy_from(grantor.endpoint(), id, 4, &mut out)
        .expect("in bounds");
    assert_eq!(out, [0xde, 0xad]);
}

#[test]
fn detaching_the_grantor_revokes_its_grants() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");
    let grantor_ep = grantor.endpoint();

    let buffer = GrantBuffer::new(16);
    let id = grantor
        .grant_access(&buffer, 0..16, grantee.endpoint(), GrantAccess::READ)
        .expect("table has room");

    let mapping = grantee
        .safemap(grantor_ep, id, 0, 8, false)
        .expect("grant is live");

    drop(grantor);

    let mut out = [0u8; 4];
    assert_eq!(
        grantee.safecopy_from(grantor_ep, id, 0, &mut out),
        Err(ErrorCode::Invalid)
    );
    assert_eq!(mapping.read(0, &mut out), Err(ErrorCode::Invalid));
}

#[test]
fn empty_access_and_bad_ranges_are_rejected_at_creation() {
    let kernel = kernel();
    let grantor = kernel.attach("grantor").expect("slot available");
    let grantee = kernel.attach("grantee").expect("slot available");

    let buffer = GrantBuffer::new(16);
    assert_eq!(
        grantor.grant_access(&buffer, 0..8, grantee.endpoint(), GrantAccess::empty()),
        Err(ErrorCode::Invalid)
    );
    assert_eq!(
        grantor.grant_access(&buffer, 8..32, grantee.endpoint(), GrantAccess::READ),
        Err(ErrorCode::Invalid)
    );
}
