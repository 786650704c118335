//! Decoding of view query-string options.
//!
//! The router in front has already percent-decoded the query, what
//! arrives here is `option=value` pairs. Key-typed options are JSON,
//! `startkey=[1,"a"]` selects an array key. Unknown options are
//! ignored, malformed values are errors.

use serde_json::Value;

use crate::{Error, Result};

/// Recognized view query options, with their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewParams {
    /// Key coerces StartKey = EndKey = Key.
    pub key: Option<Value>,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    /// Whether the EndKey row is included, default true.
    pub inclusive_end: bool,
    /// Reverses final order and swaps the role of StartKey/EndKey.
    pub descending: bool,
    pub skip: usize,
    /// ZERO means no limit.
    pub limit: usize,
    /// Group by the full key.
    pub group: bool,
    /// Group by an array-prefix of this length.
    pub group_level: usize,
    /// Attach the document to each row, map-only views.
    pub include_docs: bool,
    /// None means reduce when a reduce function is present.
    pub reduce: Option<bool>,
}

impl Default for ViewParams {
    fn default() -> ViewParams {
        ViewParams {
            key: None,
            start_key: None,
            end_key: None,
            inclusive_end: true,
            descending: false,
            skip: 0,
            limit: 0,
            group: false,
            group_level: 0,
            include_docs: false,
            reduce: None,
        }
    }
}

impl ViewParams {
    /// Decode params from a query string, `a=1&b=2` form.
    pub fn from_query(query: &str) -> Result<ViewParams> {
        let mut params = ViewParams::default();
        if query.is_empty() {
            return Ok(params);
        }

        for pair in query.split('&') {
            let (option, value) = match pair.split_once('=') {
                Some((option, value)) => (option, value),
                None => (pair, ""),
            };
            match option {
                "key" => params.key = Some(parse_json_value(option, value)?),
                "startkey" | "start_key" => {
                    params.start_key = Some(parse_json_value(option, value)?)
                }
                "endkey" | "end_key" => {
                    params.end_key = Some(parse_json_value(option, value)?)
                }
                "inclusive_end" => params.inclusive_end = parse_bool(option, value)?,
                "descending" => params.descending = parse_bool(option, value)?,
                "skip" => params.skip = parse_num(option, value)?,
                "limit" => params.limit = parse_num(option, value)?,
                "group" => params.group = parse_bool(option, value)?,
                "group_level" => params.group_level = parse_num(option, value)?,
                "include_docs" => params.include_docs = parse_bool(option, value)?,
                "reduce" => params.reduce = Some(parse_bool(option, value)?),
                _ => (), // stale, update_seq and friends, ignored.
            }
        }
        Ok(params)
    }
}

fn parse_json_value(option: &str, value: &str) -> Result<Value> {
    err_at!(
        InvalidInput,
        serde_json::from_str(value),
        "option {}={}",
        option,
        value
    )
}

fn parse_bool(option: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => err_at!(InvalidInput, msg: "option {}={} want true/false", option, value),
    }
}

fn parse_num(option: &str, value: &str) -> Result<usize> {
    err_at!(InvalidInput, value.parse(), "option {}={}", option, value)
}

#[cfg(test)]
#[path = "params_test.rs"]
mod params_test;
