//! Module `couch` implement the couch-compatible adapter shims.
//!
//! Routing, URL parsing and authentication live in front of this module
//! and are not its business. Each endpoint takes already-routed path
//! pieces plus a raw query/body and answers a [CouchResponse], a status
//! code, a body and an optional `X-Couchbase-Meta` header value.
//!
//! A database reference may carry a bucket-uuid assertion,
//! `<db>;<uuid>`, and endpoints reached through a `%2f`-encoded path
//! may select one vbucket, both checked here the way the wire protocol
//! expects.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use std::{
    sync::{mpsc, Arc},
    thread, time,
};

use crate::{
    bucket::{Bucket, Buckets},
    mc::{McRequest, McResponse, Opcode, Status},
    vbucket::vbucket_id_for_key,
    view::{self, ViewParams},
    Error,
};

/// Soft deadline for view and `_all_docs` requests. Overruns are logged,
/// in-flight work is never canceled.
pub const VIEW_DEADLINE: time::Duration = time::Duration::from_secs(1);

/// Decoded response of an adapter endpoint.
#[derive(Clone, Debug)]
pub struct CouchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Value for the X-Couchbase-Meta header, raw-document responses.
    pub meta: Option<String>,
}

impl CouchResponse {
    fn json<T: Serialize>(status: u16, body: &T) -> CouchResponse {
        CouchResponse {
            status,
            body: serde_json::to_vec(body).unwrap_or_default(),
            meta: None,
        }
    }

    fn raw(status: u16, body: Vec<u8>, meta: Option<String>) -> CouchResponse {
        CouchResponse { status, body, meta }
    }

    fn error(status: u16, msg: &str) -> CouchResponse {
        CouchResponse {
            status,
            body: msg.as_bytes().to_vec(),
            meta: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Compose the X-Couchbase-Meta value for a document.
pub fn make_meta(id: &str) -> String {
    format!(r#"{{"id":"{}","rev":"0"}}"#, id)
}

// resolve "<name>[;<uuid>]" plus an optional vbucket selector against
// the registry. Err is the ready-made failure response.
fn check_db(
    buckets: &Buckets,
    db: &str,
    vbucket: Option<&str>,
) -> Result<Arc<Bucket>, CouchResponse> {
    let (name, uuid) = match db.split_once(';') {
        Some((name, uuid)) => (name, Some(uuid)),
        None => (db, None),
    };

    let bucket = match buckets.get(name) {
        Some(bucket) => bucket,
        None => return Err(CouchResponse::error(404, &format!("no db: {}", name))),
    };

    if let Some(uuid) = uuid {
        // a supplied bucket uuid MUST match.
        if uuid != bucket.get_bucket_settings().uuid {
            return Err(CouchResponse::error(404, "uuids_dont_match"));
        }
    }

    if let Some(vbucket) = vbucket {
        // "master" is the administrative pseudo-vbucket.
        if vbucket != "master" {
            let vbid: u16 = match vbucket.parse() {
                Ok(vbid) => vbid,
                Err(_) => {
                    return Err(CouchResponse::error(404, &format!("no db: {}", db)))
                }
            };
            if bucket.get_vbucket(vbid).is_none() {
                return Err(CouchResponse::error(404, &format!("no db: {}", db)));
            }
        }
    }

    Ok(bucket)
}

/// `GET /<db>`, `GET /<db>;<uuid>`, `GET /<db>/<vb>`.
pub fn get_db(buckets: &Buckets, db: &str, vbucket: Option<&str>) -> CouchResponse {
    let bucket = match check_db(buckets, db, vbucket) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let db_name = match vbucket {
        Some(vb) => format!("{}%2f{}", bucket.to_name(), vb),
        None => bucket.to_name(),
    };
    CouchResponse::json(200, &json!({ "db_name": db_name }))
}

/// `GET /<db>/<docId>`, raw item body with meta header.
pub fn get_doc(
    buckets: &Buckets,
    db: &str,
    vbucket: Option<&str>,
    doc_id: &str,
) -> CouchResponse {
    let bucket = match check_db(buckets, db, vbucket) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    match view::get_item(&bucket, doc_id.as_bytes()) {
        Some(body) => CouchResponse::raw(200, body, Some(make_meta(doc_id))),
        None => CouchResponse::error(404, r#"{"error": "not_found", "reason": "missing"}"#),
    }
}

/// `GET /<db>/_design/<docId>`.
pub fn get_ddoc(buckets: &Buckets, db: &str, ddoc_id: &str) -> CouchResponse {
    let bucket = match check_db(buckets, db, None) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let key = format!("_design/{}", ddoc_id);
    match bucket.get_ddoc(&key) {
        Ok(Some(body)) => CouchResponse::raw(200, body, Some(make_meta(&key))),
        Ok(None) => CouchResponse::error(404, "Not Found"),
        Err(err) => CouchResponse::error(500, &format!("getDDoc err: {}", err)),
    }
}

/// `PUT /<db>/_design/<docId>`, validate and store.
pub fn put_ddoc(buckets: &Buckets, db: &str, ddoc_id: &str, body: &[u8]) -> CouchResponse {
    let bucket = match check_db(buckets, db, None) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let key = format!("_design/{}", ddoc_id);
    match bucket.set_ddoc(&key, body) {
        Ok(_) => CouchResponse::raw(201, Vec::default(), None),
        Err(err) => CouchResponse::error(400, &format!("Bad Request, err: {}", err)),
    }
}

/// `GET /<db>/_design/<docId>/_view/<viewId>?<params>`.
pub fn get_view(
    buckets: &Buckets,
    db: &str,
    ddoc_id: &str,
    view_id: &str,
    query: &str,
) -> CouchResponse {
    let params = match ViewParams::from_query(query) {
        Ok(params) => params,
        Err(err) => {
            return CouchResponse::error(400, &format!("view param parsing err: {}", err))
        }
    };

    let bucket = match check_db(buckets, db, None) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let label = format!("GET:/{}/_design/{}/_view/{}", db, ddoc_id, view_id);
    deadlined(&label, VIEW_DEADLINE, || {
        match view::query_view(&bucket, ddoc_id, view_id, &params) {
            Ok(result) => CouchResponse::json(200, &result),
            Err(Error::KeyNotFound(_, msg)) => CouchResponse::error(404, &msg),
            Err(Error::InvalidInput(_, msg)) | Err(Error::FailScript(_, msg)) => {
                CouchResponse::error(400, &msg)
            }
            Err(err) => CouchResponse::error(500, &format!("view err: {}", err)),
        }
    })
}

/// `GET /<db>/_all_docs?<params>`.
pub fn all_docs(buckets: &Buckets, db: &str, query: &str) -> CouchResponse {
    let params = match ViewParams::from_query(query) {
        Ok(params) => params,
        Err(err) => {
            return CouchResponse::error(400, &format!("param parsing err: {}", err))
        }
    };

    let bucket = match check_db(buckets, db, None) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let label = format!("GET:/{}/_all_docs", db);
    deadlined(&label, VIEW_DEADLINE, || {
        match view::all_docs(&bucket, &params) {
            Ok(result) => CouchResponse::json(200, &result),
            Err(err) => CouchResponse::error(500, &format!("all_docs err: {}", err)),
        }
    })
}

/// `POST /<db>/<vb>/_revs_diff`. Conflict resolution is a non-goal,
/// everything the caller offers is reported missing.
pub fn revs_diff(
    buckets: &Buckets,
    db: &str,
    vbucket: Option<&str>,
    body: &[u8],
) -> CouchResponse {
    let _bucket = match check_db(buckets, db, vbucket) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let request: serde_json::Map<String, Value> = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            let msg = format!("Unable to parse _revs_diff body as JSON: {}", err);
            return CouchResponse::error(500, &msg);
        }
    };

    let mut response = serde_json::Map::new();
    for (key, val) in request {
        response.insert(key, json!({ "missing": val }));
    }
    CouchResponse::json(200, &Value::Object(response))
}

#[derive(Deserialize)]
struct BulkDocsRequest {
    #[serde(default)]
    docs: Vec<BulkDocsItem>,
}

#[derive(Deserialize)]
struct BulkDocsItem {
    meta: BulkDocsItemMeta,
    #[serde(default)]
    base64: String,
}

#[derive(Deserialize)]
struct BulkDocsItemMeta {
    id: String,
    #[serde(default)]
    rev: String,
    #[serde(default)]
    expiration: u32,
    #[serde(default)]
    flags: u32,
}

/// `POST /<db>/<vb>/_bulk_docs`. Bodies arrive base64-encoded, keys are
/// hashed to their vbucket and stored with a fresh cas. The reply echoes
/// the caller-supplied rev, revision assignment is a non-goal.
pub fn bulk_docs(
    buckets: &Buckets,
    db: &str,
    vbucket: Option<&str>,
    body: &[u8],
) -> CouchResponse {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let bucket = match check_db(buckets, db, vbucket) {
        Ok(bucket) => bucket,
        Err(resp) => return resp,
    };

    let request: BulkDocsRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            let msg = format!("Unable to parse _bulk_docs body as JSON: {}", err);
            return CouchResponse::error(500, &msg);
        }
    };

    let num_partitions = bucket.get_bucket_settings().num_partitions;
    let mut response = vec![];
    for doc in request.docs {
        let key = doc.meta.id.as_bytes().to_vec();
        let vbid = vbucket_id_for_key(&key, num_partitions);
        let vb = match bucket.get_vbucket(vbid) {
            Some(vb) => vb,
            None => {
                let msg = format!("Invalid vbucket for this key: {}", doc.meta.id);
                return CouchResponse::error(500, &msg);
            }
        };

        let value = match STANDARD.decode(doc.base64.as_bytes()) {
            Ok(value) => value,
            Err(err) => {
                let msg = format!(
                    "Error decoding base64 data for key: {} - {}",
                    doc.meta.id, err
                );
                return CouchResponse::error(500, &msg);
            }
        };

        let mut req = McRequest::new(Opcode::Set, vbid);
        req.set_key(key)
            .set_body(value)
            .set_flags(doc.meta.flags)
            .set_expiration(doc.meta.expiration);

        match vb.dispatch(&req) {
            Some(McResponse {
                status: Status::Success,
                ..
            }) => {
                response.push(json!({"id": doc.meta.id, "rev": doc.meta.rev}));
            }
            resp => {
                warn!(target: "couch", "bulk_docs write {:?} failed: {:?}", doc.meta.id, resp);
                return CouchResponse::error(500, "Internal Error");
            }
        }
    }

    CouchResponse::json(201, &response)
}

/// `POST /<db>/<vb>/_ensure_full_commit`, a no-op acknowledgement.
pub fn ensure_full_commit(
    buckets: &Buckets,
    db: &str,
    vbucket: Option<&str>,
) -> CouchResponse {
    match check_db(buckets, db, vbucket) {
        Ok(_) => CouchResponse::json(201, &json!({ "ok": true })),
        Err(resp) => resp,
    }
}

/// Run `func` under a soft deadline. Overruns log a warning when the
/// deadline passes and again on eventual completion, the work itself is
/// never canceled.
pub fn deadlined<T, F>(label: &str, deadline: time::Duration, func: F) -> T
where
    F: FnOnce() -> T,
{
    let start = time::Instant::now();

    let (tx, rx) = mpsc::channel::<()>();
    let watchdog = {
        let label = label.to_string();
        thread::spawn(move || match rx.recv_timeout(deadline) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(target: "couch", "{} is taking longer than {:?}", label, deadline);
                true
            }
            _ => false,
        })
    };

    let out = func();

    std::mem::drop(tx);
    if watchdog.join().unwrap_or(false) {
        warn!(target: "couch", "{} eventually finished in {:?}", label, start.elapsed());
    }
    out
}

#[cfg(test)]
#[path = "couch_test.rs"]
mod couch_test;
