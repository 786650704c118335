//! Design documents, the named (map, reduce?) declarations a view
//! query runs against.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Key prefix under which design documents are stored in the reserved
/// design-doc vbucket.
pub const DDOC_PREFIX: &str = "_design/";

/// A design document, parsed. Unknown fields, `_id` and friends, are
/// carried by the raw body and ignored here.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DesignDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub views: BTreeMap<String, View>,
}

/// One named view within a design document.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct View {
    #[serde(default)]
    pub map: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<String>,
}

/// Validate a design-doc body before storing it. The body must parse as
/// JSON, declare at least one view, and its `language`, when present,
/// must be `javascript`.
pub fn check_ddoc(body: &[u8]) -> Result<DesignDoc> {
    if body.is_empty() {
        return err_at!(InvalidInput, msg: "empty design-doc body");
    }

    let ddoc: DesignDoc = err_at!(FailJson, serde_json::from_slice(body))?;

    if ddoc.views.is_empty() {
        return err_at!(InvalidInput, msg: "design-doc has no views");
    }
    match ddoc.language.as_deref() {
        None | Some("javascript") => (),
        Some(lang) => {
            return err_at!(InvalidInput, msg: "unsupported language {:?}", lang)
        }
    }

    Ok(ddoc)
}

#[cfg(test)]
#[path = "ddoc_test.rs"]
mod ddoc_test;
