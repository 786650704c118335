use serde_json::json;

use super::*;

const SUM: &str =
    "|keys, values, rereduce| { let sum = 0; for v in values { sum += v; } sum }";

fn row(key: serde_json::Value, value: serde_json::Value) -> ViewRow {
    ViewRow {
        id: Some("x".to_string()),
        key,
        value,
        doc: None,
    }
}

#[test]
fn test_array_prefix() {
    assert_eq!(array_prefix(&json!([1, 2, 3]), 0), json!(null));
    assert_eq!(array_prefix(&json!([1, 2, 3]), 1), json!([1]));
    assert_eq!(array_prefix(&json!([1, 2, 3]), 2), json!([1, 2]));
    assert_eq!(array_prefix(&json!([1, 2, 3]), 5), json!([1, 2, 3]));

    // non-array keys group by the whole key.
    assert_eq!(array_prefix(&json!(7), 2), json!(7));
    assert_eq!(array_prefix(&json!("k"), GROUP_FULL), json!("k"));
    assert_eq!(array_prefix(&json!(7), 0), json!(null));
}

#[test]
fn test_reduce_single_group() {
    let sandbox = Sandbox::new();
    let func = sandbox.compile(SUM).unwrap();

    let rows: Vec<ViewRow> =
        (1..=4).map(|i| row(json!(i), json!(1))).collect();

    let out = reduce_rows(&sandbox, &func, &rows, 0).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key, json!(null));
    assert_eq!(out[0].value, json!(4));
    assert!(out[0].id.is_none());
}

#[test]
fn test_reduce_group_level() {
    let sandbox = Sandbox::new();
    let func = sandbox.compile(SUM).unwrap();

    // category = amount / 2 over amounts 1..=4, in collated order.
    let rows = vec![
        row(json!([0, 1]), json!(1)),
        row(json!([1, 2]), json!(1)),
        row(json!([1, 3]), json!(1)),
        row(json!([2, 4]), json!(1)),
    ];

    let out = reduce_rows(&sandbox, &func, &rows, 1).unwrap();
    let keys: Vec<_> = out.iter().map(|r| r.key.clone()).collect();
    let values: Vec<_> = out.iter().map(|r| r.value.clone()).collect();
    assert_eq!(keys, vec![json!([0]), json!([1]), json!([2])]);
    assert_eq!(values, vec![json!(1), json!(2), json!(1)]);

    let out = reduce_rows(&sandbox, &func, &rows, 2).unwrap();
    assert_eq!(out.len(), 4);
    assert_eq!(out[1].key, json!([1, 2]));
    assert_eq!(out[1].value, json!(1));

    // full-key grouping, equal keys fold together.
    let rows = vec![
        row(json!("a"), json!(1)),
        row(json!("a"), json!(1)),
        row(json!("b"), json!(1)),
    ];
    let out = reduce_rows(&sandbox, &func, &rows, GROUP_FULL).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].value, json!(2));
    assert_eq!(out[1].value, json!(1));
}

#[test]
fn test_reduce_error_is_fatal() {
    let sandbox = Sandbox::new();
    let func = sandbox.compile("|keys, values, rereduce| nonsense()").unwrap();

    let rows = vec![row(json!(1), json!(1))];
    assert!(reduce_rows(&sandbox, &func, &rows, 0).is_err());
}
