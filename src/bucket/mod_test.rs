use std::{env, ffi, fs, path};

use super::*;
use crate::mc::{McRequest, Opcode, Status};

fn tmp_dir(name: &str) -> ffi::OsString {
    let dir: path::PathBuf = [
        env::temp_dir(),
        format!("vbstore-{}-{}", name, std::process::id()).into(),
    ]
    .iter()
    .collect();
    fs::remove_dir_all(&dir).ok();
    dir.into_os_string()
}

fn load_ints(vb: &VBucket, n: usize) {
    for i in 0..n {
        let mut req = McRequest::new(Opcode::Set, vb.to_id());
        req.set_key(format!("{}", i).into_bytes())
            .set_body(format!("{}", i).into_bytes());
        let resp = vb.dispatch(&req).unwrap();
        assert_eq!(resp.status, Status::Success);
    }
}

fn visitor_output(vb: &VBucket) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut items = vec![];
    vb.visit(None, |key, data| {
        items.push((key.to_vec(), data.to_vec()));
        true
    })
    .unwrap();
    items
}

#[test]
fn test_bucket_settings_validation() {
    let dir = tmp_dir("settings-validation");

    for np in [0_u16, 3, 100, 2048] {
        let mut settings = BucketSettings::default();
        settings.set_num_partitions(np);
        assert!(Bucket::create(&dir, "bad", settings).is_err(), "np {}", np);
    }

    let bucket = Bucket::create(&dir, "good", BucketSettings::default()).unwrap();
    assert_eq!(bucket.get_bucket_settings().num_partitions, MAX_VBUCKETS);
    assert!(!bucket.get_bucket_settings().uuid.is_empty());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_item_bytes_persists() {
    let dir = tmp_dir("item-bytes-persists");

    let b0 = Bucket::create(&dir, "default", BucketSettings::default()).unwrap();

    let num_bytes0 = b0.get_item_bytes();
    assert!(num_bytes0 > 0, "initial item bytes should be non-zero");

    let vb0 = b0.create_vbucket(2).unwrap();
    let num_bytes1 = b0.get_item_bytes();
    assert_eq!(num_bytes1, num_bytes0, "vbucket creation should not affect bytes");

    b0.set_vb_state(2, VBState::Active).unwrap();
    assert_eq!(vb0.to_stats().items, 0);
    let num_bytes2 = b0.get_item_bytes();
    assert!(num_bytes2 > num_bytes1, "state metadata should increase bytes");

    load_ints(&vb0, 5);
    assert_eq!(vb0.to_stats().items, 5);
    let num_bytes3 = b0.get_item_bytes();
    assert!(num_bytes3 > num_bytes2, "data changes should increase bytes");

    b0.flush().unwrap();
    assert_eq!(vb0.to_stats().items, 5);
    let num_bytes4 = b0.get_item_bytes();
    assert_eq!(num_bytes4, num_bytes3, "flush should not change bytes");

    // round-trip: a fresh handle over the same directory reproduces
    // items, bytes and visitor output.
    let b1 = Bucket::open(&dir, "default").unwrap();
    b1.load().unwrap();

    let vb1 = b1.get_vbucket(2).unwrap();
    assert_eq!(vb1.to_state(), VBState::Active);
    assert_eq!(vb0.to_stats().items, vb1.to_stats().items);
    assert_eq!(vb0.to_stats().item_bytes, vb1.to_stats().item_bytes);
    assert_eq!(b0.get_item_bytes(), b1.get_item_bytes());
    assert_eq!(visitor_output(&vb0), visitor_output(&vb1));

    // uuid survives reload.
    assert_eq!(b0.get_bucket_settings().uuid, b1.get_bucket_settings().uuid);

    // cas tokens survive reload, a cas write keyed on the old token works.
    let old = vb0.as_index().get(b"0".as_slice()).unwrap();
    let new = vb1.as_index().get(b"0".as_slice()).unwrap();
    assert_eq!(old.seqno, new.seqno);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bucket_ddocs() {
    let dir = tmp_dir("bucket-ddocs");
    let bucket = Bucket::create(&dir, "default", BucketSettings::default()).unwrap();

    let body = br#"{"views": {"v0": {"map": "|doc, meta| emit(meta.id, ())"}}}"#;

    assert!(bucket.set_ddoc("no-prefix", body).is_err());
    assert!(bucket.set_ddoc("_design/d0", b"").is_err());
    assert!(bucket.set_ddoc("_design/d0", b"{}").is_err());

    bucket.set_ddoc("_design/d0", body).unwrap();
    assert_eq!(bucket.get_ddoc("_design/d0").unwrap().unwrap(), body.to_vec());
    assert_eq!(bucket.get_ddoc("_design/nope").unwrap(), None);

    let ddocs = bucket.get_ddocs().unwrap();
    assert_eq!(ddocs.len(), 1);
    assert!(ddocs["_design/d0"].views.contains_key("v0"));

    // cache is invalidated on set_ddoc.
    let body2 = br#"{"views": {"v1": {"map": "|doc, meta| emit(meta.id, ())"}}}"#;
    bucket.set_ddoc("_design/d1", body2).unwrap();
    let ddocs = bucket.get_ddocs().unwrap();
    assert_eq!(ddocs.len(), 2);

    // design docs survive the round-trip.
    bucket.flush().unwrap();
    let b1 = Bucket::open(&dir, "default").unwrap();
    b1.load().unwrap();
    assert_eq!(b1.get_ddocs().unwrap().len(), 2);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bucket_compact() {
    let dir = tmp_dir("bucket-compact");
    let bucket = Bucket::create(&dir, "default", BucketSettings::default()).unwrap();

    bucket.set_vb_state(1, VBState::Active).unwrap();
    bucket.set_vb_state(2, VBState::Active).unwrap();
    load_ints(&bucket.get_vbucket(1).unwrap(), 3);
    bucket.flush().unwrap();

    let loc = files::to_vbucket_location(&bucket.dir, 2);
    assert!(path::Path::new(&loc).exists());

    bucket.set_vb_state(2, VBState::Dead).unwrap();
    bucket.compact().unwrap();

    assert!(bucket.get_vbucket(2).is_none());
    assert!(!path::Path::new(&loc).exists());
    assert!(bucket.get_vbucket(1).is_some());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bucket_start_stats() {
    let dir = tmp_dir("bucket-start-stats");
    let bucket =
        Arc::new(Bucket::create(&dir, "default", BucketSettings::default()).unwrap());

    bucket.set_vb_state(0, VBState::Active).unwrap();
    load_ints(&bucket.get_vbucket(0).unwrap(), 7);

    bucket.start_stats(time::Duration::from_millis(5)).unwrap();
    std::thread::sleep(time::Duration::from_millis(100));

    let stats = bucket.cached_stats();
    assert_eq!(stats.items, 7);
    assert_eq!(stats.n_sets, 7);
    assert_eq!(stats.item_bytes, bucket.get_item_bytes());

    // the background flush noticed the writes.
    let loc = files::to_vbucket_location(&bucket.dir, 0);
    assert!(path::Path::new(&loc).exists());

    bucket.close().unwrap();
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bucket_memory_only() {
    let dir = tmp_dir("bucket-memory-only");

    let mut settings = BucketSettings::default();
    settings.set_memory_only(2);
    let bucket = Bucket::create(&dir, "default", settings).unwrap();
    bucket.set_vb_state(0, VBState::Active).unwrap();
    load_ints(&bucket.get_vbucket(0).unwrap(), 3);
    bucket.flush().unwrap();

    // nothing must have touched the disk.
    assert!(!path::Path::new(&dir).exists());

    fs::remove_dir_all(&dir).ok();
}
