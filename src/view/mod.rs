//! Module `view` implement couch-style map/reduce views over a bucket.
//!
//! The pipeline: visit every vbucket's snapshot, feed each document to
//! the map function in an embedded sandbox, collect emitted rows, sort
//! them under CouchDB collation, select the requested key range,
//! optionally reduce with grouping, then paginate. `_all_docs` is the
//! sandbox-free special case, a k-way sorted merge of per-vbucket
//! streams.
//!
//! View execution is strictly per-request, the [Sandbox] is created for
//! the request and never shared.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use std::cmp::Ordering;

use crate::{
    bucket::Bucket,
    vbucket::{vbucket_id_for_key, VBState},
    Error, Result,
};

mod collate;
pub mod ddoc;
mod merge;
mod params;
mod reduce;
mod sandbox;

pub use collate::collate_json;
pub use ddoc::{check_ddoc, DesignDoc, View};
pub use merge::{merge_view_rows, MergeRows};
pub use params::ViewParams;
pub use sandbox::{Sandbox, SandboxFn};

use crate::view::ddoc::DDOC_PREFIX;
use crate::view::reduce::GROUP_FULL;

/// A view aborts once per-document map failures exceed this count.
pub const MAX_VIEW_ERRORS: usize = 100;

/// One result row. Reduced rows carry no id, `include_docs` attaches
/// the document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<ViewDocValue>,
}

/// Document attachment for a row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewDocValue {
    pub meta: Value,
    pub json: Value,
}

/// A view response, rows plus the post-pagination row count.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ViewResult {
    pub total_rows: usize,
    pub rows: Vec<ViewRow>,
}

/// Execute view `view_name` of design-doc `ddoc_id` against `bucket`.
/// `ddoc_id` is the bare name, without the `_design/` prefix.
pub fn query_view(
    bucket: &Bucket,
    ddoc_id: &str,
    view_name: &str,
    params: &ViewParams,
) -> Result<ViewResult> {
    let ddocs = bucket.get_ddocs()?;
    let ddoc = match ddocs.get(&format!("{}{}", DDOC_PREFIX, ddoc_id)) {
        Some(ddoc) => ddoc,
        None => return err_at!(KeyNotFound, msg: "design doc {:?}", ddoc_id),
    };
    let view = match ddoc.views.get(view_name) {
        Some(view) => view,
        None => return err_at!(KeyNotFound, msg: "view {:?}", view_name),
    };
    if view.map.is_empty() {
        return err_at!(InvalidInput, msg: "view {:?} map function missing", view_name);
    }

    let sandbox = Sandbox::new();
    let map_fn = sandbox.compile(&view.map)?;

    let mut rows = run_map_phase(bucket, &sandbox, &map_fn)?;
    rows.sort_by(|a, b| collate_json(&a.key, &b.key));

    let mut rows = process_view_result(rows, params);

    let do_reduce = view.reduce.is_some() && params.reduce.unwrap_or(true);
    if do_reduce {
        let reduce_fn = sandbox.compile(view.reduce.as_ref().unwrap())?;
        let level = match params.group {
            true => GROUP_FULL,
            false => params.group_level,
        };
        rows = reduce::reduce_rows(&sandbox, &reduce_fn, &rows, level)?;
    } else if params.include_docs {
        docify_view_result(bucket, &mut rows);
    }

    paginate(&mut rows, params);
    Ok(ViewResult {
        total_rows: rows.len(),
        rows,
    })
}

/// The `_all_docs` view: every document of every vbucket, sorted by id,
/// document attached. Runs without the sandbox.
pub fn all_docs(bucket: &Bucket, params: &ViewParams) -> Result<ViewResult> {
    // recognized for parse-compatibility, not applied here.
    let _ = params;

    let np = bucket.get_bucket_settings().num_partitions;
    let mut streams: Vec<Box<dyn Iterator<Item = ViewRow>>> = vec![];

    for vbid in 0..np {
        let vb = match bucket.get_vbucket(vbid) {
            Some(vb) => vb,
            None => continue,
        };
        let mut rows = vec![];
        vb.visit(None, |key, data| {
            let doc_id = String::from_utf8_lossy(key).to_string();
            let (doc, doc_type) = doc_from_body(data);
            rows.push(ViewRow {
                id: Some(doc_id.clone()),
                key: Value::String(doc_id.clone()),
                value: Value::Null,
                doc: Some(ViewDocValue {
                    meta: json!({"id": doc_id, "type": doc_type}),
                    json: doc,
                }),
            });
            true
        })?;
        streams.push(Box::new(rows.into_iter()));
    }

    let rows: Vec<ViewRow> = merge_view_rows(streams).collect();
    Ok(ViewResult {
        total_rows: rows.len(),
        rows,
    })
}

fn run_map_phase(
    bucket: &Bucket,
    sandbox: &Sandbox,
    map_fn: &SandboxFn,
) -> Result<Vec<ViewRow>> {
    let mut rows = vec![];
    let mut n_errs = 0_usize;
    let mut last_err: Option<Error> = None;

    let np = bucket.get_bucket_settings().num_partitions;
    for vbid in 0..np {
        let vb = match bucket.get_vbucket(vbid) {
            Some(vb) => vb,
            None => continue,
        };

        vb.visit(None, |key, data| {
            let doc_id = String::from_utf8_lossy(key).to_string();
            let (doc, doc_type) = doc_from_body(data);
            let meta = json!({"id": doc_id, "type": doc_type});

            match sandbox.call_map(map_fn, &doc, &meta) {
                Ok(emits) => {
                    for (key, value) in emits {
                        rows.push(ViewRow {
                            id: Some(doc_id.clone()),
                            key,
                            value,
                            doc: None,
                        });
                    }
                }
                Err(err) => {
                    // per-document failures only escalate in bulk.
                    warn!(target: "view", "map error on {:?}: {}", doc_id, err);
                    n_errs += 1;
                    last_err = Some(err);
                    if n_errs > MAX_VIEW_ERRORS {
                        return false;
                    }
                }
            }
            true
        })?;

        if n_errs > MAX_VIEW_ERRORS {
            let err = last_err.take().unwrap();
            return err_at!(
                InvalidInput,
                msg: "view aborted after {} map errors, last: {}", n_errs, err
            );
        }
    }

    Ok(rows)
}

// key-range selection over collated rows, mirroring couch semantics:
// start keeps [i, end) ascending and [0, i] descending, end keeps
// [0, i) ascending and [i, end) descending, then descending reverses.
fn process_view_result(mut rows: Vec<ViewRow>, p: &ViewParams) -> Vec<ViewRow> {
    let (start_key, end_key) = match &p.key {
        Some(key) => (Some(key), Some(key)),
        None => (p.start_key.as_ref(), p.end_key.as_ref()),
    };

    if let Some(start) = start_key {
        let i = rows.partition_point(|row| collate_json(&row.key, start) == Ordering::Less);
        if p.descending {
            rows.truncate((i + 1).min(rows.len()));
        } else {
            rows.drain(..i);
        }
    }

    if let Some(end) = end_key {
        let i = match p.inclusive_end {
            // first row collating after the end key.
            true => rows.partition_point(|row| collate_json(&row.key, end) != Ordering::Greater),
            // first row collating at-or-after the end key.
            false => rows.partition_point(|row| collate_json(&row.key, end) == Ordering::Less),
        };
        if p.descending {
            rows.drain(..i);
        } else {
            rows.truncate(i);
        }
    }

    if p.descending {
        rows.reverse();
    }
    rows
}

fn paginate(rows: &mut Vec<ViewRow>, p: &ViewParams) {
    if p.skip > 0 {
        let n = p.skip.min(rows.len());
        rows.drain(..n);
    }
    if p.limit > 0 && rows.len() > p.limit {
        rows.truncate(p.limit);
    }
}

// attach parsed documents to map rows. bodies that are not JSON keep no
// attachment.
fn docify_view_result(bucket: &Bucket, rows: &mut [ViewRow]) {
    for row in rows.iter_mut() {
        let id = match row.id.as_ref() {
            Some(id) if !id.is_empty() => id.clone(),
            _ => continue,
        };
        let body = match get_item(bucket, id.as_bytes()) {
            Some(body) => body,
            None => continue,
        };
        if let Ok(parsed) = serde_json::from_slice::<Value>(&body) {
            row.doc = Some(ViewDocValue {
                meta: json!({"id": id, "rev": "0"}),
                json: parsed,
            });
        }
    }
}

/// Fetch the raw body of `key` from its active vbucket, None when the
/// vbucket is missing, not active, or the key is absent.
pub fn get_item(bucket: &Bucket, key: &[u8]) -> Option<Vec<u8>> {
    let np = bucket.get_bucket_settings().num_partitions;
    let vbid = vbucket_id_for_key(key, np);
    let vb = bucket.get_vbucket(vbid)?;
    if vb.to_state() != VBState::Active {
        return None;
    }
    vb.as_index().get(key).ok().map(|e| e.value.value)
}

fn doc_from_body(data: &[u8]) -> (Value, &'static str) {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    match serde_json::from_slice::<Value>(data) {
        Ok(doc) => (doc, "json"),
        Err(_) => (Value::String(STANDARD.encode(data)), "base64"),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
