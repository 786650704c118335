use std::time::{Duration, UNIX_EPOCH};

use super::*;

#[test]
fn test_vbucket_hash() {
    // boundary fixture, clients must agree on this mapping.
    assert_eq!(vbucket_id_for_key(b"hello", 1024), 528);

    for np in [1_u16, 2, 4, 16, 256, 1024] {
        let vbid = vbucket_id_for_key(b"hello", np);
        assert!(vbid < np, "np {} vbid {}", np, vbid);
    }
}

#[test]
fn test_compute_exp() {
    // 2013-03-05T18:01:00Z
    let current = UNIX_EPOCH + Duration::from_secs(1362506460);
    let now = move || current;

    for (inp, out) in [(0_u32, 0_u32), (838424824, 838424824), (300, 1362506760)] {
        assert_eq!(compute_exp(inp, now), out, "inp {}", inp);
    }
}

#[test]
fn test_vbstate_transitions() {
    let legal = [
        (VBState::Pending, VBState::Active),
        (VBState::Pending, VBState::Replica),
        (VBState::Pending, VBState::Dead),
        (VBState::Active, VBState::Replica),
        (VBState::Active, VBState::Dead),
        (VBState::Replica, VBState::Active),
        (VBState::Replica, VBState::Dead),
    ];
    for (from, to) in legal {
        assert!(from.is_legal_transition(to), "{} -> {}", from, to);
    }

    let illegal = [
        (VBState::Dead, VBState::Active),
        (VBState::Dead, VBState::Replica),
        (VBState::Dead, VBState::Pending),
        (VBState::Active, VBState::Pending),
        (VBState::Replica, VBState::Pending),
        (VBState::Active, VBState::Active),
    ];
    for (from, to) in illegal {
        assert!(!from.is_legal_transition(to), "{} -> {}", from, to);
    }

    let vb = VBucket::new(0);
    assert_eq!(vb.to_state(), VBState::Pending);
    vb.set_state(VBState::Active).unwrap();
    assert_eq!(vb.to_state(), VBState::Active);
    vb.set_state(VBState::Dead).unwrap();
    assert!(vb.set_state(VBState::Active).is_err());
}

#[test]
fn test_vbstate_metadata_bytes() {
    let vb = VBucket::new(2);
    assert_eq!(vb.item_bytes(), 0);

    // a state change must be visible in the byte count even with no items.
    vb.set_state(VBState::Active).unwrap();
    assert!(vb.item_bytes() > 0);
}

#[test]
fn test_vbucket_get_set_delete() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();

    // miss
    let mut req = McRequest::new(Opcode::Get, 0);
    req.set_key(b"a".to_vec());
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::KeyNotFound);

    // quiet miss gives no response
    let mut req = McRequest::new(Opcode::GetQ, 0);
    req.set_key(b"a".to_vec());
    assert!(vb.dispatch(&req).is_none());

    // set
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"a".to_vec()).set_body(b"hello".to_vec()).set_flags(42);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::Success);
    let cas = resp.cas;
    assert!(cas > 0);

    // get it back
    let mut req = McRequest::new(Opcode::Get, 0);
    req.set_key(b"a".to_vec());
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.body, b"hello".to_vec());
    assert_eq!(resp.flags, 42);
    assert_eq!(resp.cas, cas);

    // cas mismatch
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"a".to_vec()).set_body(b"x".to_vec()).set_cas(cas + 99);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::KeyExists);

    // cas match
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"a".to_vec()).set_body(b"world".to_vec()).set_cas(cas);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::Success);
    assert!(resp.cas > cas);

    // delete
    let mut req = McRequest::new(Opcode::Delete, 0);
    req.set_key(b"a".to_vec());
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::Success);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::KeyNotFound);
}

#[test]
fn test_vbucket_add_replace() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();

    let mut req = McRequest::new(Opcode::Replace, 0);
    req.set_key(b"a".to_vec()).set_body(b"1".to_vec());
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::KeyNotFound);

    let mut req = McRequest::new(Opcode::Add, 0);
    req.set_key(b"a".to_vec()).set_body(b"1".to_vec());
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::Success);
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::KeyExists);

    let mut req = McRequest::new(Opcode::Replace, 0);
    req.set_key(b"a".to_vec()).set_body(b"2".to_vec());
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::Success);

    let mut req = McRequest::new(Opcode::Get, 0);
    req.set_key(b"a".to_vec());
    assert_eq!(vb.dispatch(&req).unwrap().body, b"2".to_vec());
}

#[test]
fn test_vbucket_incr_decr() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();

    // missing key without initial
    let mut req = McRequest::new(Opcode::Incr, 0);
    req.set_key(b"n".to_vec()).set_delta(1, None);
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::KeyNotFound);

    // missing key with initial
    let mut req = McRequest::new(Opcode::Incr, 0);
    req.set_key(b"n".to_vec()).set_delta(1, Some(10));
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.body, b"10".to_vec());

    // increment
    let mut req = McRequest::new(Opcode::Incr, 0);
    req.set_key(b"n".to_vec()).set_delta(5, None);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.body, b"15".to_vec());

    // decrement saturates at zero
    let mut req = McRequest::new(Opcode::Decr, 0);
    req.set_key(b"n".to_vec()).set_delta(100, None);
    let resp = vb.dispatch(&req).unwrap();
    assert_eq!(resp.body, b"0".to_vec());

    // non-numeric value
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"s".to_vec()).set_body(b"abc".to_vec());
    vb.dispatch(&req).unwrap();
    let mut req = McRequest::new(Opcode::Incr, 0);
    req.set_key(b"s".to_vec()).set_delta(1, None);
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::DeltaBadval);
}

#[test]
fn test_vbucket_stats_match() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();
    let meta_bytes = vb.item_bytes();

    let mut expect_bytes = meta_bytes;
    for i in 0..10 {
        let key = format!("key-{}", i).into_bytes();
        let body = format!("value-{}", i).into_bytes();
        expect_bytes += key.len() + body.len() + ITEM_OVERHEAD;

        let mut req = McRequest::new(Opcode::Set, 0);
        req.set_key(key).set_body(body);
        vb.dispatch(&req).unwrap();
    }

    let stats = vb.to_stats();
    assert_eq!(stats.items, 10);
    assert_eq!(stats.item_bytes, expect_bytes);
    assert_eq!(stats.n_sets, 10);

    // overwrite adjusts bytes by the delta
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"key-0".to_vec()).set_body(b"longer-value-than-before".to_vec());
    vb.dispatch(&req).unwrap();
    expect_bytes = expect_bytes - "value-0".len() + "longer-value-than-before".len();
    assert_eq!(vb.to_stats().item_bytes, expect_bytes);

    // delete gives the bytes back
    let mut req = McRequest::new(Opcode::Delete, 0);
    req.set_key(b"key-1".to_vec());
    vb.dispatch(&req).unwrap();
    expect_bytes -= "key-1".len() + "value-1".len() + ITEM_OVERHEAD;
    let stats = vb.to_stats();
    assert_eq!(stats.items, 9);
    assert_eq!(stats.item_bytes, expect_bytes);
}

#[test]
fn test_vbucket_visit_snapshot() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();

    for i in 0..10 {
        let mut req = McRequest::new(Opcode::Set, 0);
        req.set_key(format!("key-{}", i).into_bytes()).set_body(b"v".to_vec());
        vb.dispatch(&req).unwrap();
    }

    // in key order, from the start key
    let mut keys = vec![];
    vb.visit(Some(b"key-5".as_slice()), |key, _data| {
        keys.push(key.to_vec());
        true
    })
    .unwrap();
    assert_eq!(
        keys,
        vec![b"key-5".to_vec(), b"key-6".to_vec(), b"key-7".to_vec(),
             b"key-8".to_vec(), b"key-9".to_vec()]
    );

    // abort on false
    let mut n = 0;
    vb.visit(None, |_key, _data| {
        n += 1;
        n < 3
    })
    .unwrap();
    assert_eq!(n, 3);
}

#[test]
fn test_vbucket_expiry() {
    let vb = VBucket::new(0);
    vb.set_state(VBState::Active).unwrap();

    // already-expired absolute timestamp
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"gone".to_vec())
        .set_body(b"v".to_vec())
        .set_expiration(MAX_EXP_OFFSET + 1);
    vb.dispatch(&req).unwrap();

    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"kept".to_vec()).set_body(b"v".to_vec());
    vb.dispatch(&req).unwrap();

    // lazy expiry on access counts as a miss and deletes the item.
    let mut req = McRequest::new(Opcode::Get, 0);
    req.set_key(b"gone".to_vec());
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::KeyNotFound);
    assert_eq!(vb.items(), 1);

    // sweep removes expired items wholesale.
    let mut req = McRequest::new(Opcode::Set, 0);
    req.set_key(b"gone2".to_vec())
        .set_body(b"v".to_vec())
        .set_expiration(MAX_EXP_OFFSET + 1);
    vb.dispatch(&req).unwrap();
    let n = vb.expire_items(std::time::SystemTime::now()).unwrap();
    assert_eq!(n, 1);
    assert_eq!(vb.items(), 1);
}
