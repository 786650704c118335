use serde_json::{json, Value};

use std::{ffi, sync::Arc};

use super::*;
use crate::{
    mc::{McRequest, Opcode, Status},
    BucketSettings, VBState,
};

const NP: u16 = 4;

fn setup_bucket() -> Arc<Bucket> {
    let mut settings = BucketSettings::default();
    settings.set_num_partitions(NP).set_memory_only(2);

    let dir = ffi::OsString::from("unused");
    let bucket = Arc::new(Bucket::create(&dir, "default", settings).unwrap());
    for vbid in 0..NP {
        bucket.set_vb_state(vbid, VBState::Active).unwrap();
    }

    // amounts: a 1, d 2, b 3, c 4.
    for (id, amount) in [("a", 1), ("b", 3), ("c", 4), ("d", 2)] {
        set_doc(&bucket, id, json!({"amount": amount}));
    }
    bucket
}

fn set_doc(bucket: &Bucket, id: &str, body: Value) {
    let key = id.as_bytes().to_vec();
    let vbid = vbucket_id_for_key(&key, NP);
    let vb = bucket.get_vbucket(vbid).unwrap();

    let mut req = McRequest::new(Opcode::Set, vbid);
    req.set_key(key).set_body(serde_json::to_vec(&body).unwrap());
    assert_eq!(vb.dispatch(&req).unwrap().status, Status::Success);
}

fn setup_map_ddoc(bucket: &Bucket) {
    let body = br#"{
        "language": "javascript",
        "views": {
            "v0": { "map": "|doc, meta| emit(doc.amount, ())" }
        }
    }"#;
    bucket.set_ddoc("_design/d0", body).unwrap();
}

fn setup_reduce_ddoc(bucket: &Bucket) {
    let ddoc = json!({
        "views": {
            "v0": {
                "map": "|doc, meta| emit(doc.amount, 1)",
                "reduce": "|keys, values, rereduce| { let sum = 0; for v in values { sum += v; } sum }"
            },
            "grouped": {
                "map": "|doc, meta| emit([doc.amount / 2, doc.amount], 1)",
                "reduce": "|keys, values, rereduce| { let sum = 0; for v in values { sum += v; } sum }"
            }
        }
    });
    bucket
        .set_ddoc("_design/d0", &serde_json::to_vec(&ddoc).unwrap())
        .unwrap();
}

fn ids(result: &ViewResult) -> Vec<String> {
    result.rows.iter().map(|r| r.id.clone().unwrap()).collect()
}

fn keys(result: &ViewResult) -> Vec<Value> {
    result.rows.iter().map(|r| r.key.clone()).collect()
}

fn query(bucket: &Bucket, q: &str) -> ViewResult {
    let params = ViewParams::from_query(q).unwrap();
    query_view(bucket, "d0", "v0", &params).unwrap()
}

#[test]
fn test_view_basic() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let res = query(&bucket, "");
    assert_eq!(res.total_rows, 4);
    assert_eq!(ids(&res), vec!["a", "d", "b", "c"]);
    assert_eq!(keys(&res), vec![json!(1), json!(2), json!(3), json!(4)]);
    assert!(res.rows.iter().all(|r| r.doc.is_none()));
}

#[test]
fn test_view_missing() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let params = ViewParams::default();
    let err = query_view(&bucket, "not-a-ddoc", "v0", &params).unwrap_err();
    assert_eq!(err, Error::KeyNotFound(String::default(), String::default()));
    let err = query_view(&bucket, "d0", "not-a-view", &params).unwrap_err();
    assert_eq!(err, Error::KeyNotFound(String::default(), String::default()));
}

#[test]
fn test_view_ranges() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let res = query(&bucket, "startkey=2");
    assert_eq!(ids(&res), vec!["d", "b", "c"]);
    assert_eq!(keys(&res), vec![json!(2), json!(3), json!(4)]);

    let res = query(&bucket, "startkey=2&endkey=3");
    assert_eq!(ids(&res), vec!["d", "b"]);

    // key overrides start/end.
    let res = query(&bucket, "startkey=1&endkey=3&key=2");
    assert_eq!(ids(&res), vec!["d"]);
    assert_eq!(keys(&res), vec![json!(2)]);

    // inverted range yields nothing.
    let res = query(&bucket, "startkey=3&endkey=1");
    assert_eq!(res.total_rows, 0);

    let res = query(&bucket, "startkey=1&endkey=3&inclusive_end=false");
    assert_eq!(ids(&res), vec!["a", "d"]);
    assert_eq!(keys(&res), vec![json!(1), json!(2)]);

    let res = query(&bucket, "startkey=2&endkey=4&limit=1");
    assert_eq!(ids(&res), vec!["d"]);
    assert_eq!(res.total_rows, 1);
}

#[test]
fn test_view_descending() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let res = query(&bucket, "descending=true");
    assert_eq!(ids(&res), vec!["c", "b", "d", "a"]);
    assert_eq!(keys(&res), vec![json!(4), json!(3), json!(2), json!(1)]);

    let res = query(&bucket, "startkey=3&descending=true");
    assert_eq!(ids(&res), vec!["b", "d", "a"]);
    assert_eq!(keys(&res), vec![json!(3), json!(2), json!(1)]);
}

#[test]
fn test_view_reverse_involution() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let asc = query(&bucket, "");
    let desc = query(&bucket, "descending=true");
    let mut back = desc.rows.clone();
    back.reverse();
    let asc_ids: Vec<_> = asc.rows.iter().map(|r| r.id.clone()).collect();
    let back_ids: Vec<_> = back.iter().map(|r| r.id.clone()).collect();
    assert_eq!(asc_ids, back_ids);
}

#[test]
fn test_view_range_monotonic() {
    use std::cmp::Ordering;

    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let queries = [
        "",
        "startkey=1",
        "startkey=2",
        "startkey=2&endkey=4",
        "endkey=3",
        "endkey=3&inclusive_end=false",
        "startkey=0&endkey=9",
        "key=3",
        "skip=1",
        "limit=2",
    ];
    for q in queries {
        let res = query(&bucket, q);
        for pair in res.rows.windows(2) {
            assert_ne!(
                collate_json(&pair[0].key, &pair[1].key),
                Ordering::Greater,
                "query {:?}",
                q
            );
        }
    }
}

#[test]
fn test_view_include_docs() {
    let bucket = setup_bucket();
    setup_map_ddoc(&bucket);

    let res = query(&bucket, "include_docs=true");
    assert_eq!(res.total_rows, 4);
    for (i, row) in res.rows.iter().enumerate() {
        let doc = row.doc.as_ref().expect("expected a doc");
        assert_eq!(doc.json["amount"], json!(i + 1));
        assert_eq!(doc.meta["id"], row.id.clone().unwrap());
    }
}

#[test]
fn test_view_reduce() {
    let bucket = setup_bucket();
    setup_reduce_ddoc(&bucket);

    let res = query(&bucket, "");
    assert_eq!(res.total_rows, 1);
    assert_eq!(res.rows[0].key, json!(null));
    assert_eq!(res.rows[0].value, json!(4));

    let res = query(&bucket, "reduce=false");
    assert_eq!(res.total_rows, 4);
    assert_eq!(ids(&res), vec!["a", "d", "b", "c"]);

    // range selection happens before reduce.
    let res = query(&bucket, "reduce=true&startkey=2&endkey=3");
    assert_eq!(res.total_rows, 1);
    assert_eq!(res.rows[0].value, json!(2));
}

#[test]
fn test_view_group_level() {
    let bucket = setup_bucket();
    setup_reduce_ddoc(&bucket);

    let params = ViewParams::from_query("group_level=1").unwrap();
    let res = query_view(&bucket, "d0", "grouped", &params).unwrap();
    assert_eq!(keys(&res), vec![json!([0]), json!([1]), json!([2])]);
    let values: Vec<_> = res.rows.iter().map(|r| r.value.clone()).collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(1)]);

    let params = ViewParams::from_query("group_level=2&skip=1&limit=2").unwrap();
    let res = query_view(&bucket, "d0", "grouped", &params).unwrap();
    assert_eq!(keys(&res), vec![json!([1, 2]), json!([1, 3])]);
    let values: Vec<_> = res.rows.iter().map(|r| r.value.clone()).collect();
    assert_eq!(values, vec![json!(1), json!(1)]);

    // group=true is full-key grouping.
    let params = ViewParams::from_query("group=true").unwrap();
    let res = query_view(&bucket, "d0", "grouped", &params).unwrap();
    assert_eq!(res.total_rows, 4);
}

#[test]
fn test_view_all_docs() {
    let bucket = setup_bucket();

    let res = all_docs(&bucket, &ViewParams::default()).unwrap();
    assert_eq!(res.total_rows, 4);
    assert_eq!(ids(&res), vec!["a", "b", "c", "d"]);
    for row in res.rows.iter() {
        let doc = row.doc.as_ref().unwrap();
        assert_eq!(doc.meta["type"], json!("json"));
        assert!(doc.json.get("amount").is_some());
    }
}

#[test]
fn test_view_non_json_doc() {
    let bucket = setup_bucket();

    // a body that is not JSON surfaces as base64 with type tagged.
    let key = b"blob".to_vec();
    let vbid = vbucket_id_for_key(&key, NP);
    let mut req = McRequest::new(Opcode::Set, vbid);
    req.set_key(key).set_body(vec![0xff, 0xfe, 0x00]);
    bucket.get_vbucket(vbid).unwrap().dispatch(&req).unwrap();

    let res = all_docs(&bucket, &ViewParams::default()).unwrap();
    assert_eq!(res.total_rows, 5);
    let row = res.rows.iter().find(|r| r.id.as_deref() == Some("blob")).unwrap();
    let doc = row.doc.as_ref().unwrap();
    assert_eq!(doc.meta["type"], json!("base64"));
    assert_eq!(doc.json, json!("//4A"));

    // include_docs silently drops the attachment for non-JSON bodies.
    setup_map_ddoc(&bucket);
    let body = br#"{
        "views": { "all": { "map": "|doc, meta| emit(meta.id, meta.type)" } }
    }"#;
    bucket.set_ddoc("_design/d1", body).unwrap();
    let params = ViewParams::from_query("include_docs=true").unwrap();
    let res = query_view(&bucket, "d1", "all", &params).unwrap();
    let row = res.rows.iter().find(|r| r.id.as_deref() == Some("blob")).unwrap();
    assert!(row.doc.is_none());
    assert_eq!(row.value, json!("base64"));
}

#[test]
fn test_view_map_errors_abort() {
    let bucket = setup_bucket();

    // 102 documents whose map throws must abort the view.
    for i in 0..102 {
        set_doc(&bucket, &format!("doc-{:03}", i), json!({"other": i}));
    }
    let body = br#"{
        "views": { "bad": { "map": "|doc, meta| emit(doc.amount.nested, ())" } }
    }"#;
    bucket.set_ddoc("_design/d2", body).unwrap();

    let err = query_view(&bucket, "d2", "bad", &ViewParams::default()).unwrap_err();
    assert_eq!(err, Error::InvalidInput(String::default(), String::default()));
}
