use serde_json::json;

use super::*;

#[test]
fn test_params_defaults() {
    let params = ViewParams::from_query("").unwrap();
    assert_eq!(params, ViewParams::default());
    assert!(params.inclusive_end);
    assert!(!params.descending);
    assert_eq!(params.limit, 0);
    assert_eq!(params.reduce, None);
}

#[test]
fn test_params_parsing() {
    let query = "startkey=1&endkey=3&inclusive_end=false&descending=true\
                 &skip=2&limit=10&group=true&group_level=2&include_docs=true\
                 &reduce=false";
    let params = ViewParams::from_query(query).unwrap();

    assert_eq!(params.start_key, Some(json!(1)));
    assert_eq!(params.end_key, Some(json!(3)));
    assert!(!params.inclusive_end);
    assert!(params.descending);
    assert_eq!(params.skip, 2);
    assert_eq!(params.limit, 10);
    assert!(params.group);
    assert_eq!(params.group_level, 2);
    assert!(params.include_docs);
    assert_eq!(params.reduce, Some(false));
}

#[test]
fn test_params_json_keys() {
    let params = ViewParams::from_query(r#"key="a""#).unwrap();
    assert_eq!(params.key, Some(json!("a")));

    let params = ViewParams::from_query(r#"startkey=[1,"a"]"#).unwrap();
    assert_eq!(params.start_key, Some(json!([1, "a"])));

    // bare words are not JSON.
    assert!(ViewParams::from_query("key=a").is_err());
    assert!(ViewParams::from_query("descending=yes").is_err());
    assert!(ViewParams::from_query("limit=ten").is_err());

    // unknown options are ignored.
    let params = ViewParams::from_query("stale=ok&update_seq=true").unwrap();
    assert_eq!(params, ViewParams::default());
}

#[test]
fn test_params_aliases() {
    let a = ViewParams::from_query("startkey=1&endkey=2").unwrap();
    let b = ViewParams::from_query("start_key=1&end_key=2").unwrap();
    assert_eq!(a, b);
}
