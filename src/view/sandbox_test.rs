use serde_json::json;

use super::*;

#[test]
fn test_sandbox_map() {
    let sandbox = Sandbox::new();
    let map = sandbox.compile("|doc, meta| emit(doc.amount, ())").unwrap();

    let doc = json!({"amount": 3});
    let meta = json!({"id": "a", "type": "json"});
    let rows = sandbox.call_map(&map, &doc, &meta).unwrap();
    assert_eq!(rows, vec![(json!(3), json!(null))]);

    // emits are per-call, nothing leaks between documents.
    let doc = json!({"amount": 7});
    let rows = sandbox.call_map(&map, &doc, &meta).unwrap();
    assert_eq!(rows, vec![(json!(7), json!(null))]);
}

#[test]
fn test_sandbox_map_multi_emit() {
    let sandbox = Sandbox::new();
    let map = sandbox
        .compile("|doc, meta| { emit(meta.id, doc.amount); emit([doc.amount], 1); }")
        .unwrap();

    let doc = json!({"amount": 2});
    let meta = json!({"id": "d", "type": "json"});
    let rows = sandbox.call_map(&map, &doc, &meta).unwrap();
    assert_eq!(
        rows,
        vec![(json!("d"), json!(2)), (json!([2]), json!(1))]
    );
}

#[test]
fn test_sandbox_map_throw() {
    let sandbox = Sandbox::new();
    let map = sandbox.compile("|doc, meta| emit(doc.missing.deep, ())").unwrap();

    let doc = json!({"amount": 1});
    let meta = json!({"id": "a", "type": "json"});
    assert!(sandbox.call_map(&map, &doc, &meta).is_err());
}

#[test]
fn test_sandbox_compile_error() {
    let sandbox = Sandbox::new();
    assert!(sandbox.compile("|doc, meta| emit(").is_err());
}

#[test]
fn test_sandbox_reduce() {
    let sandbox = Sandbox::new();
    let src = "|keys, values, rereduce| { let sum = 0; for v in values { sum += v; } sum }";
    let reduce = sandbox.compile(src).unwrap();

    let keys = vec![json!(1), json!(2), json!(3)];
    let values = vec![json!(1), json!(1), json!(1)];
    let res = sandbox.call_reduce(&reduce, &keys, &values, false).unwrap();
    assert_eq!(res, json!(3));
}
